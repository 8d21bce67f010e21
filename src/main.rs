// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{
  path::Path,
  sync::Arc,
  thread,
  time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use droneguard::{
  input::{InputWrapper, VideoSource},
  model::{Detector, OnnxModelBuilder},
  output::Draw,
  publisher::{FramePublisher, PublishedFrame},
  task::ContinuousTask,
};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();
  let args = args::Args::parse();

  let detector_config = args.detector_config();
  detector_config.validate().context("检测参数无效")?;
  let capture_config = args.capture_config();
  capture_config.validate().context("采集参数无效")?;

  info!("模型文件路径: {}", args.model.display());
  info!("视频源: {}", args.source);
  info!(
    "输入尺寸: {}, 置信度阈值: {}, NMS 阈值: {}",
    detector_config.image_size, detector_config.confidence_threshold, detector_config.nms_threshold
  );

  let source = VideoSource::parse(&args.source).context("无法解析视频源")?;

  let mut builder = OnnxModelBuilder::new(&args.model).image_size(detector_config.image_size);
  if let Some(threads) = args.threads {
    builder = builder.intra_threads(threads);
  }
  let model = builder.build().context("无法加载模型")?;
  let detector = Detector::new(model, &detector_config);

  let draw = Draw::new(detector_config.label.clone()).context("无法加载字体")?;
  let publisher = Arc::new(FramePublisher::new().context("无法生成占位帧")?);

  let task = ContinuousTask::new(capture_config.clone(), draw);
  let stop = task.stop_handle();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    stop.stop();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  let open_config = capture_config.clone();
  let handle = task.spawn(
    move || InputWrapper::open(&source, &open_config),
    detector,
    Arc::clone(&publisher),
  )?;

  let mut last_report = Instant::now();
  let mut last_sequence = 0;
  while !handle.is_finished() {
    thread::sleep(POLL_INTERVAL);

    if let Some(path) = &args.snapshot {
      let frame = publisher.latest();
      if frame.sequence != last_sequence {
        last_sequence = frame.sequence;
        if let Err(e) = write_snapshot(path, &frame) {
          warn!("写入快照失败: {}", e);
        }
      }
    }

    if last_report.elapsed() >= capture_config.stats_log_interval {
      info!("{}", handle.stats.snapshot());
      last_report = Instant::now();
    }
  }

  let stats = handle.stats();
  handle.join().context("采集任务失败")?;
  info!("处理完成: {}", stats.snapshot().to_json());

  Ok(())
}

/// 先写临时文件再改名，读者不会看到写了一半的图像
fn write_snapshot(path: &Path, frame: &PublishedFrame) -> std::io::Result<()> {
  let tmp = path.with_extension("jpg.tmp");
  std::fs::write(&tmp, &frame.bytes)?;
  std::fs::rename(&tmp, path)
}
