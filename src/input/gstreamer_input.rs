// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入
//!
//! 支持三类视频源，统一输出 BGR 帧：
//! - 本地摄像头（V4L2）
//! - HTTP(S) 网络流
//! - 视频文件
//!
//! 使用前需要安装 GStreamer 开发库，并启用 `gstreamer_input` 特性：
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ```no_run
//! use droneguard::input::{FrameSource, GStreamerInputPipelineBuilder, VideoSource};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = VideoSource::parse("0")?;
//! let mut input = GStreamerInputPipelineBuilder::for_source(&source).build()?;
//! let frame = input.read_frame()?;
//! println!("{}x{}", frame.width(), frame.height());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::DEFAULT_PULL_TIMEOUT,
  frame::{BGR_CHANNELS, BgrFrame},
  input::{FrameSource, InputError, VideoSource},
};

/// 等待管道进入播放状态的时长
const STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsink 元素")]
  AppSinkNotFound,
  #[error("无法将元素转换为 appsink")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式: {0}")]
  UnsupportedFormat(String),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望至少 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  CameraSource { device: String },
  NetworkSource { uri: String },
  FileSource(String),
  TargetFormat { format: String },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::CameraSource { device } => {
        format!("v4l2src device={}", device)
      }
      GStreamerInputBuilderItem::NetworkSource { uri } => {
        format!("uridecodebin uri=\"{}\"", uri)
      }
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  live: bool,
  pull_timeout: Duration,
}

impl GStreamerInputPipelineBuilder {
  pub fn for_source(source: &VideoSource) -> Self {
    let item = match source {
      VideoSource::Device(index) => GStreamerInputBuilderItem::CameraSource {
        device: format!("/dev/video{}", index),
      },
      VideoSource::Network(url) => GStreamerInputBuilderItem::NetworkSource {
        uri: url.to_string(),
      },
      VideoSource::File(path) => GStreamerInputBuilderItem::FileSource(path.display().to_string()),
    };

    Self {
      items: vec![
        item,
        GStreamerInputBuilderItem::TargetFormat {
          format: "BGR".to_string(),
        },
      ],
      live: source.is_live(),
      pull_timeout: DEFAULT_PULL_TIMEOUT,
    }
  }

  pub fn pull_timeout(mut self, timeout: Duration) -> Self {
    self.pull_timeout = timeout;
    self
  }

  pub fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");

    // 实时源只保留最新一帧
    let sink = if self.live {
      "appsink max-buffers=1 drop=true name=sink"
    } else {
      "appsink max-buffers=2 name=sink"
    };
    format!("{} ! {}", basic_pipeline, sink)
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let description = self.description();
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    let input = GStreamerInput {
      pipeline,
      appsink,
      live: self.live,
      pull_timeout: self.pull_timeout,
    };

    input.pipeline.set_state(gst::State::Playing)?;
    // 打不开的设备或文件在这里暴露，而不是在第一次读取时
    let (result, state, _) = input
      .pipeline
      .state(gst::ClockTime::from_mseconds(STATE_CHANGE_TIMEOUT.as_millis() as u64));
    result?;
    input.check_bus()?;
    debug!("管道状态: {:?}", state);

    Ok(input)
  }
}

pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  live: bool,
  pull_timeout: Duration,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

impl GStreamerInput {
  fn check_bus(&self) -> Result<(), GStreamerInputError> {
    let Some(bus) = self.pipeline.bus() else {
      return Ok(());
    };
    if let Some(message) = bus.pop_filtered(&[gst::MessageType::Error])
      && let gst::MessageView::Error(err) = message.view()
    {
      return Err(GStreamerInputError::PipelineError(format!(
        "{} ({:?})",
        err.error(),
        err.debug()
      )));
    }
    Ok(())
  }
}

impl FrameSource for GStreamerInput {
  fn read_frame(&mut self) -> Result<BgrFrame, InputError> {
    self.check_bus()?;

    let timeout = gst::ClockTime::from_mseconds(self.pull_timeout.as_millis() as u64);
    match self.appsink.try_pull_sample(timeout) {
      Some(sample) => Ok(convert_sample(&sample)?),
      None if self.appsink.is_eos() => Err(InputError::EndOfStream),
      None => Err(InputError::Timeout),
    }
  }

  fn rewind(&mut self) -> Result<(), InputError> {
    self
      .pipeline
      .seek_simple(
        gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
        gst::ClockTime::ZERO,
      )
      .map_err(GStreamerInputError::from)?;
    debug!("视频回到起点");
    Ok(())
  }

  fn is_live(&self) -> bool {
    self.live
  }
}

/// 按行拷贝，去掉行尾对齐填充
fn convert_sample(sample: &gst::Sample) -> Result<BgrFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Bgr {
    return Err(GStreamerInputError::UnsupportedFormat(format!(
      "{:?}",
      video_info.format()
    )));
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let row_bytes = width * BGR_CHANNELS;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected = if height == 0 {
    0
  } else {
    (height - 1) * stride + row_bytes
  };
  if data.len() < expected || stride < row_bytes {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_bytes * height);
  for row in 0..height {
    let start = row * stride;
    pixels.extend_from_slice(&data[start..start + row_bytes]);
  }

  let actual = pixels.len();
  BgrFrame::from_raw(video_info.width(), video_info.height(), pixels).map_err(|_| {
    GStreamerInputError::BufferSizeMismatch {
      expected: row_bytes * height,
      actual,
    }
  })
}
