// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/frame.rs - BGR 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

pub const BGR_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 交错排列的 BGR 帧（HWC 布局）
///
/// 尺寸由采集源决定，一次循环内由采集线程独占。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgrFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl BgrFrame {
  pub fn with_shape(width: u32, height: u32) -> Self {
    let size = BGR_CHANNELS * (width as usize) * (height as usize);
    Self {
      width,
      height,
      data: vec![0u8; size].into_boxed_slice(),
    }
  }

  /// 填充为单一颜色，`bgr` 按 B、G、R 顺序给出
  pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
    let mut frame = Self::with_shape(width, height);
    for pixel in frame.data.chunks_exact_mut(BGR_CHANNELS) {
      pixel.copy_from_slice(&bgr);
    }
    frame
  }

  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = BGR_CHANNELS * (width as usize) * (height as usize);
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    BGR_CHANNELS
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
    if x >= self.width || y >= self.height {
      return None;
    }
    let idx = ((y as usize) * (self.width as usize) + x as usize) * BGR_CHANNELS;
    Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
  }

  pub fn as_bgr(&self) -> &[u8] {
    &self.data
  }

  /// 转为 RGB 顺序的图像，用于编码和保存
  pub fn to_rgb_image(&self) -> RgbImage {
    let data = &self.data;
    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let idx = ((y as usize) * (self.width as usize) + x as usize) * BGR_CHANNELS;
      Rgb([data[idx + 2], data[idx + 1], data[idx]])
    })
  }

  pub fn from_rgb_image(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let mut frame = Self::with_shape(width, height);
    for (dst, src) in frame
      .data
      .chunks_exact_mut(BGR_CHANNELS)
      .zip(image.as_raw().chunks_exact(BGR_CHANNELS))
    {
      dst[0] = src[2];
      dst[1] = src[1];
      dst[2] = src[0];
    }
    frame
  }
}

impl AsRef<[u8]> for BgrFrame {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}

impl AsMut<[u8]> for BgrFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}
