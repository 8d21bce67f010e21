// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/input.rs - 视频/图像输入
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
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  config::CaptureConfig,
  frame::{BgrFrame, FrameError},
};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputBuilderItem, GStreamerInputError, GStreamerInputPipelineBuilder,
};

/// 可直接按单帧读取的图像扩展名
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// 逐帧读取的视频源
pub trait FrameSource {
  fn read_frame(&mut self) -> Result<BgrFrame, InputError>;

  /// 回到第一帧，仅对文件源有意义
  fn rewind(&mut self) -> Result<(), InputError>;

  /// 实时设备读取失败时重试，文件源则回绕播放
  fn is_live(&self) -> bool;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn read_frame(&mut self) -> Result<BgrFrame, InputError> {
    (**self).read_frame()
  }

  fn rewind(&mut self) -> Result<(), InputError> {
    (**self).rewind()
  }

  fn is_live(&self) -> bool {
    (**self).is_live()
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("无效的视频源描述: {0}")]
  InvalidDescriptor(String),
  #[error("文件不存在: {0}")]
  FileNotFound(PathBuf),
  #[error("不支持的视频源: {0}")]
  Unsupported(String),
  #[error("读取帧超时")]
  Timeout,
  #[error("视频流结束")]
  EndOfStream,
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("帧数据错误: {0}")]
  Frame(#[from] FrameError),
}

/// 视频源描述：数字为设备编号，`http(s)://` 为网络流，其余为文件路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
  Device(u32),
  Network(Url),
  File(PathBuf),
}

impl VideoSource {
  pub fn parse(descriptor: &str) -> Result<Self, InputError> {
    let descriptor = descriptor.trim();
    if descriptor.is_empty() {
      return Err(InputError::InvalidDescriptor("空字符串".to_string()));
    }

    if descriptor.bytes().all(|b| b.is_ascii_digit()) {
      return descriptor
        .parse::<u32>()
        .map(VideoSource::Device)
        .map_err(|e| InputError::InvalidDescriptor(format!("{}: {}", descriptor, e)));
    }

    let lower = descriptor.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
      return Url::parse(descriptor)
        .map(VideoSource::Network)
        .map_err(|e| InputError::InvalidDescriptor(format!("{}: {}", descriptor, e)));
    }

    Ok(VideoSource::File(PathBuf::from(descriptor)))
  }

  pub fn is_live(&self) -> bool {
    !matches!(self, VideoSource::File(_))
  }
}

impl fmt::Display for VideoSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      VideoSource::Device(index) => write!(f, "设备 {}", index),
      VideoSource::Network(url) => write!(f, "网络流 {}", url),
      VideoSource::File(path) => write!(f, "文件 {}", path.display()),
    }
  }
}

pub fn is_still_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_ascii_lowercase();
      IMAGE_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl InputWrapper {
  pub fn open(source: &VideoSource, config: &CaptureConfig) -> Result<Self, InputError> {
    info!("打开视频源: {}", source);

    if let VideoSource::File(path) = source {
      if !path.exists() {
        return Err(InputError::FileNotFound(path.clone()));
      }
      if is_still_image(path) {
        return Ok(InputWrapper::ReadImageFile(ImageFileInput::open(path)?));
      }
    }

    Self::open_stream(source, config)
  }

  #[cfg(feature = "gstreamer_input")]
  fn open_stream(source: &VideoSource, config: &CaptureConfig) -> Result<Self, InputError> {
    let input = GStreamerInputPipelineBuilder::for_source(source)
      .pull_timeout(config.pull_timeout)
      .build()?;
    Ok(InputWrapper::GStreamerInput(input))
  }

  #[cfg(not(feature = "gstreamer_input"))]
  fn open_stream(source: &VideoSource, _config: &CaptureConfig) -> Result<Self, InputError> {
    Err(InputError::Unsupported(format!(
      "{} 需要启用 gstreamer_input 特性",
      source
    )))
  }
}

impl FrameSource for InputWrapper {
  fn read_frame(&mut self) -> Result<BgrFrame, InputError> {
    match self {
      InputWrapper::ReadImageFile(input) => input.read_frame(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.read_frame(),
    }
  }

  fn rewind(&mut self) -> Result<(), InputError> {
    match self {
      InputWrapper::ReadImageFile(input) => input.rewind(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.rewind(),
    }
  }

  fn is_live(&self) -> bool {
    match self {
      InputWrapper::ReadImageFile(input) => input.is_live(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.is_live(),
    }
  }
}
