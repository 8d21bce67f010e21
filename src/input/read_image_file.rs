// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::Path;

use image::ImageReader;
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::BgrFrame,
  input::{FrameSource, InputError},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单张图像，表现为只有一帧的视频文件
pub struct ImageFileInput {
  frame: BgrFrame,
  consumed: bool,
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let frame = BgrFrame::from_rgb_image(&image.to_rgb8());
    debug!(
      "读取图像 {}: {}x{}",
      path.display(),
      frame.width(),
      frame.height()
    );

    Ok(Self::from_frame(frame))
  }

  pub fn from_frame(frame: BgrFrame) -> Self {
    Self {
      frame,
      consumed: false,
    }
  }
}

impl FrameSource for ImageFileInput {
  fn read_frame(&mut self) -> Result<BgrFrame, InputError> {
    if self.consumed {
      return Err(InputError::EndOfStream);
    }
    self.consumed = true;
    Ok(self.frame.clone())
  }

  fn rewind(&mut self) -> Result<(), InputError> {
    self.consumed = false;
    Ok(())
  }

  fn is_live(&self) -> bool {
    false
  }
}
