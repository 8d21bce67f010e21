// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/task.rs - 采集与检测任务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  fmt,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, Sender},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{CaptureConfig, ConfigError},
  frame::BgrFrame,
  input::{FrameSource, InputError},
  model::{DetectionSet, Detector, InferenceError, Model, PreprocessedInput, RawOutput},
  output::{Render, draw::Draw, encode_jpeg},
  publisher::FramePublisher,
};

pub const CAPTURE_THREAD_NAME: &str = "video-main";

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("无法打开视频源: {0}")]
  SourceOpen(#[from] InputError),
  #[error("采集参数无效: {0}")]
  Config(#[from] ConfigError),
  #[error("无法启动采集线程: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("采集线程异常退出")]
  Panicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureState {
  Opening = 0,
  Running = 1,
  Degraded = 2,
  Stopped = 3,
}

impl CaptureState {
  fn from_u8(value: u8) -> Self {
    match value {
      0 => CaptureState::Opening,
      1 => CaptureState::Running,
      2 => CaptureState::Degraded,
      _ => CaptureState::Stopped,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      CaptureState::Opening => "opening",
      CaptureState::Running => "running",
      CaptureState::Degraded => "degraded",
      CaptureState::Stopped => "stopped",
    }
  }
}

impl fmt::Display for CaptureState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 停止请求；发送后正在休眠的采集线程会立即醒来
#[derive(Debug, Clone)]
pub struct StopHandle {
  flag: Arc<AtomicBool>,
  tx: Sender<()>,
}

impl StopHandle {
  pub fn stop(&self) {
    self.flag.store(true, Ordering::Release);
    // 采集线程已退出时接收端已释放，标志位足以表达停止
    if self.tx.send(()).is_err() {
      debug!("采集线程已结束，停止信号无需唤醒");
    }
  }

  pub fn is_stopped(&self) -> bool {
    self.flag.load(Ordering::Acquire)
  }
}

/// 采集线程一侧的停止信号
struct StopSignal {
  flag: Arc<AtomicBool>,
  rx: Receiver<()>,
}

fn stop_channel() -> (StopHandle, StopSignal) {
  let flag = Arc::new(AtomicBool::new(false));
  let (tx, rx) = mpsc::channel();
  (
    StopHandle {
      flag: Arc::clone(&flag),
      tx,
    },
    StopSignal { flag, rx },
  )
}

impl StopSignal {
  fn is_stopped(&self) -> bool {
    self.flag.load(Ordering::Acquire)
  }

  /// 休眠至多 `timeout`，返回是否收到停止请求
  fn wait(&self, timeout: Duration) -> bool {
    if self.is_stopped() {
      return true;
    }
    match self.rx.recv_timeout(timeout) {
      Ok(()) => true,
      Err(RecvTimeoutError::Timeout) => self.is_stopped(),
      Err(RecvTimeoutError::Disconnected) => {
        // 所有 StopHandle 都已丢弃，只能按时休眠
        thread::sleep(timeout);
        self.is_stopped()
      }
    }
  }
}

/// 采集线程写入、任意线程读取的运行统计
#[derive(Debug)]
pub struct CaptureStats {
  state: AtomicU8,
  running: AtomicBool,
  frames: AtomicU64,
  published: AtomicU64,
  detection_failures: AtomicU64,
  encode_failures: AtomicU64,
  read_failures: AtomicU64,
  last_detections: AtomicUsize,
  last_frame_bytes: AtomicUsize,
  /// 相对 `started` 的毫秒数
  last_activity_ms: AtomicU64,
  started: Instant,
  started_at: DateTime<Utc>,
}

impl Default for CaptureStats {
  fn default() -> Self {
    Self {
      state: AtomicU8::new(CaptureState::Opening as u8),
      running: AtomicBool::new(false),
      frames: AtomicU64::new(0),
      published: AtomicU64::new(0),
      detection_failures: AtomicU64::new(0),
      encode_failures: AtomicU64::new(0),
      read_failures: AtomicU64::new(0),
      last_detections: AtomicUsize::new(0),
      last_frame_bytes: AtomicUsize::new(0),
      last_activity_ms: AtomicU64::new(0),
      started: Instant::now(),
      started_at: Utc::now(),
    }
  }
}

impl CaptureStats {
  pub fn state(&self) -> CaptureState {
    CaptureState::from_u8(self.state.load(Ordering::Acquire))
  }

  fn set_state(&self, state: CaptureState) {
    self.state.store(state as u8, Ordering::Release);
    self
      .running
      .store(matches!(state, CaptureState::Running | CaptureState::Degraded), Ordering::Release);
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  pub fn frames(&self) -> u64 {
    self.frames.load(Ordering::Acquire)
  }

  fn touch(&self) {
    let elapsed = self.started.elapsed().as_millis() as u64;
    self.last_activity_ms.store(elapsed, Ordering::Release);
  }

  fn record_frame(&self) -> u64 {
    self.touch();
    self.frames.fetch_add(1, Ordering::AcqRel) + 1
  }

  fn record_detections(&self, count: usize) {
    self.last_detections.store(count, Ordering::Release);
  }

  fn record_detection_failure(&self) {
    self.last_detections.store(0, Ordering::Release);
    self.detection_failures.fetch_add(1, Ordering::AcqRel);
  }

  fn record_published(&self, bytes: usize) {
    self.last_frame_bytes.store(bytes, Ordering::Release);
    self.published.fetch_add(1, Ordering::AcqRel);
  }

  fn record_encode_failure(&self) {
    self.encode_failures.fetch_add(1, Ordering::AcqRel);
  }

  fn record_read_failure(&self) {
    self.read_failures.fetch_add(1, Ordering::AcqRel);
  }

  pub fn snapshot(&self) -> StatsSnapshot {
    let now = self.started.elapsed();
    let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Acquire));

    StatsSnapshot {
      state: self.state(),
      running: self.is_running(),
      frames: self.frames(),
      published: self.published.load(Ordering::Acquire),
      detection_failures: self.detection_failures.load(Ordering::Acquire),
      encode_failures: self.encode_failures.load(Ordering::Acquire),
      read_failures: self.read_failures.load(Ordering::Acquire),
      last_detections: self.last_detections.load(Ordering::Acquire),
      last_frame_bytes: self.last_frame_bytes.load(Ordering::Acquire),
      last_activity_ago: now.saturating_sub(last),
      started_at: self.started_at,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
  pub state: CaptureState,
  pub running: bool,
  pub frames: u64,
  pub published: u64,
  pub detection_failures: u64,
  pub encode_failures: u64,
  pub read_failures: u64,
  pub last_detections: usize,
  pub last_frame_bytes: usize,
  pub last_activity_ago: Duration,
  pub started_at: DateTime<Utc>,
}

impl StatsSnapshot {
  pub fn to_json(&self) -> serde_json::Value {
    json!({
      "state": self.state.as_str(),
      "running": self.running,
      "frames": self.frames,
      "published": self.published,
      "detection_failures": self.detection_failures,
      "encode_failures": self.encode_failures,
      "read_failures": self.read_failures,
      "last_detections": self.last_detections,
      "last_frame_bytes": self.last_frame_bytes,
      "last_activity_ms": self.last_activity_ago.as_millis() as u64,
      "started_at": self.started_at.to_rfc3339(),
    })
  }
}

impl fmt::Display for StatsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Running: {}, Frames: {}, Last activity: {}ms ago",
      self.running,
      self.frames,
      self.last_activity_ago.as_millis()
    )
  }
}

/// 后台采集线程的句柄
pub struct CaptureHandle {
  pub stop: StopHandle,
  pub stats: Arc<CaptureStats>,
  pub join: JoinHandle<Result<(), CaptureError>>,
}

impl CaptureHandle {
  pub fn stop(&self) {
    self.stop.stop();
  }

  pub fn stats(&self) -> Arc<CaptureStats> {
    Arc::clone(&self.stats)
  }

  pub fn is_finished(&self) -> bool {
    self.join.is_finished()
  }

  pub fn join(self) -> Result<(), CaptureError> {
    self.join.join().map_err(|_| CaptureError::Panicked)?
  }
}

/// 读取 -> 检测 -> 绘制 -> 编码 -> 发布 的持续循环
pub struct ContinuousTask {
  config: CaptureConfig,
  draw: Draw,
  stop: StopHandle,
  signal: StopSignal,
  stats: Arc<CaptureStats>,
}

impl ContinuousTask {
  pub fn new(config: CaptureConfig, draw: Draw) -> Self {
    let (stop, signal) = stop_channel();
    Self {
      config,
      draw,
      stop,
      signal,
      stats: Arc::new(CaptureStats::default()),
    }
  }

  pub fn stop_handle(&self) -> StopHandle {
    self.stop.clone()
  }

  pub fn stats(&self) -> Arc<CaptureStats> {
    Arc::clone(&self.stats)
  }

  /// 在名为 `video-main` 的线程上运行；视频源在该线程内打开
  pub fn spawn<F, S, M>(
    self,
    open: F,
    detector: Detector<M>,
    publisher: Arc<FramePublisher>,
  ) -> Result<CaptureHandle, CaptureError>
  where
    F: FnOnce() -> Result<S, InputError> + Send + 'static,
    S: FrameSource,
    M: Model<Input = PreprocessedInput, Output = RawOutput, Error = InferenceError> + Send + 'static,
  {
    self.config.validate()?;

    let stop = self.stop_handle();
    let stats = self.stats();
    let join = thread::Builder::new()
      .name(CAPTURE_THREAD_NAME.to_string())
      .spawn(move || self.run_task(open, detector, publisher))?;

    Ok(CaptureHandle { stop, stats, join })
  }

  fn process_frame<M>(
    &self,
    frame: BgrFrame,
    detector: &mut Detector<M>,
    publisher: &FramePublisher,
  ) where
    M: Model<Input = PreprocessedInput, Output = RawOutput, Error = InferenceError>,
  {
    // 在副本上绘制，检测失败时发布未标注的副本
    let mut annotated = frame.clone();
    match detector.detect(&frame) {
      Ok(detections) => {
        if !detections.is_empty() {
          debug!("检测到 {} 个目标", detections.len());
        }
        self.stats.record_detections(detections.len());
        self.draw.draw_detections(&mut annotated, &detections);
      }
      Err(e) => {
        warn!("检测失败, 发布未标注帧: {}", e);
        self.stats.record_detection_failure();
      }
    }

    match encode_jpeg(&annotated, self.config.jpeg_quality) {
      Ok(bytes) => {
        let len = bytes.len();
        if publisher.publish(bytes) {
          self.stats.record_published(len);
        }
      }
      Err(e) => {
        warn!("JPEG 编码失败, 保留上一帧: {}", e);
        self.stats.record_encode_failure();
      }
    }
  }
}

impl<F, S, M> Task<F, Detector<M>, Arc<FramePublisher>> for ContinuousTask
where
  F: FnOnce() -> Result<S, InputError>,
  S: FrameSource,
  M: Model<Input = PreprocessedInput, Output = RawOutput, Error = InferenceError>,
{
  type Output = ();
  type Error = CaptureError;

  fn run_task(
    self,
    open: F,
    mut detector: Detector<M>,
    publisher: Arc<FramePublisher>,
  ) -> Result<(), Self::Error> {
    let stats = Arc::clone(&self.stats);
    stats.set_state(CaptureState::Opening);

    let mut source = match open() {
      Ok(source) => source,
      Err(e) => {
        error!("打开视频源失败: {}", e);
        stats.set_state(CaptureState::Stopped);
        return Err(CaptureError::SourceOpen(e));
      }
    };

    let live = source.is_live();
    stats.set_state(CaptureState::Running);
    info!("开始采集 (实时源: {})", live);

    let mut last_log = Instant::now();
    let mut rewound_without_frame = false;

    loop {
      if self.signal.is_stopped() {
        info!("收到停止请求, 退出采集循环");
        break;
      }

      let frame = match source.read_frame() {
        Ok(frame) => frame,
        Err(e) if live => {
          if stats.state() != CaptureState::Degraded {
            warn!("读取帧失败, 稍后重试: {}", e);
            stats.set_state(CaptureState::Degraded);
          } else {
            debug!("读取帧仍然失败: {}", e);
          }
          stats.record_read_failure();
          if self.signal.wait(self.config.retry_backoff) {
            break;
          }
          continue;
        }
        Err(e) => {
          debug!("视频文件读取结束 ({}), 回到起点", e);
          let rewind = source.rewind();
          if let Err(ref e) = rewind {
            warn!("回到起点失败: {}", e);
          }
          // 连续回绕仍读不到帧时退避，避免空转
          if rewind.is_err() || rewound_without_frame {
            stats.record_read_failure();
            if self.signal.wait(self.config.retry_backoff) {
              break;
            }
          }
          rewound_without_frame = true;
          continue;
        }
      };
      rewound_without_frame = false;

      if stats.state() == CaptureState::Degraded {
        info!("视频源恢复");
        stats.set_state(CaptureState::Running);
      }

      let processed = stats.record_frame();
      self.process_frame(frame, &mut detector, &publisher);

      if last_log.elapsed() >= self.config.stats_log_interval {
        let latest = publisher.latest();
        info!(
          "已处理 {} 帧, 最新帧 {} 字节",
          processed,
          latest.len()
        );
        last_log = Instant::now();
      }

      if let Some(max) = self.config.max_frames
        && processed >= max
      {
        info!("达到指定帧数 {}, 退出采集循环", processed);
        break;
      }

      if self.signal.wait(self.config.frame_interval) {
        info!("收到停止请求, 退出采集循环");
        break;
      }
    }

    stats.set_state(CaptureState::Stopped);
    info!("采集结束: {}", stats.snapshot());
    Ok(())
  }
}

/// 读取一帧、检测并保存标注结果
pub struct OneShotTask;

impl<S, M, O> Task<S, Detector<M>, O> for OneShotTask
where
  S: FrameSource,
  M: Model<Input = PreprocessedInput, Output = RawOutput, Error = InferenceError>,
  O: Render<BgrFrame, DetectionSet>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = DetectionSet;
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: S,
    mut detector: Detector<M>,
    output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let frame = input.read_frame().context("没有输入帧")?;
    info!("输入帧获取成功 ({}x{}), 开始推理...", frame.width(), frame.height());

    let now = Instant::now();
    let detections = detector.detect(&frame)?;
    info!("推理完成, 耗时: {:.2?}, 检测到 {} 个目标", now.elapsed(), detections.len());

    output.render_result(&frame, &detections)?;
    info!("渲染完成");

    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stop_wakes_a_sleeping_wait() {
    let (handle, signal) = stop_channel();
    let waker = thread::spawn(move || {
      thread::sleep(Duration::from_millis(20));
      handle.stop();
    });

    let start = Instant::now();
    assert!(signal.wait(Duration::from_secs(10)));
    assert!(start.elapsed() < Duration::from_secs(5));
    waker.join().unwrap();
  }

  #[test]
  fn stop_after_the_loop_exits_only_sets_the_flag() {
    let (handle, signal) = stop_channel();
    drop(signal);
    handle.stop();
    assert!(handle.is_stopped());
  }

  #[test]
  fn wait_times_out_without_stop() {
    let (handle, signal) = stop_channel();
    assert!(!signal.wait(Duration::from_millis(5)));
    assert!(!handle.is_stopped());
  }

  #[test]
  fn dropped_handles_fall_back_to_sleeping() {
    let (handle, signal) = stop_channel();
    drop(handle);
    let start = Instant::now();
    assert!(!signal.wait(Duration::from_millis(10)));
    assert!(start.elapsed() >= Duration::from_millis(10));
  }

  #[test]
  fn state_drives_running_flag() {
    let stats = CaptureStats::default();
    assert_eq!(stats.state(), CaptureState::Opening);
    assert!(!stats.is_running());

    stats.set_state(CaptureState::Running);
    assert!(stats.is_running());
    stats.set_state(CaptureState::Degraded);
    assert!(stats.is_running());
    stats.set_state(CaptureState::Stopped);
    assert!(!stats.is_running());
  }

  #[test]
  fn snapshot_formats_status_line() {
    let stats = CaptureStats::default();
    stats.set_state(CaptureState::Running);
    stats.record_frame();
    stats.record_frame();
    stats.record_published(1234);

    let snapshot = stats.snapshot();
    let line = snapshot.to_string();
    assert!(line.starts_with("Running: true, Frames: 2, Last activity: "));
    assert!(line.ends_with("ms ago"));

    let value = snapshot.to_json();
    assert_eq!(value["state"], "running");
    assert_eq!(value["frames"], 2);
    assert_eq!(value["published"], 1);
    assert_eq!(value["last_frame_bytes"], 1234);
    assert!(value["started_at"].is_string());
  }
}
