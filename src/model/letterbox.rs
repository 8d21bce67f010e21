// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/model/letterbox.rs - 等比缩放与填充预处理
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

use image::{ImageBuffer, Rgb, imageops::FilterType};
use thiserror::Error;

use crate::frame::{BGR_CHANNELS, BgrFrame};

/// 填充区域的灰度值
pub const LETTERBOX_FILL: u8 = 114;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreprocessError {
  #[error("输入帧为空")]
  EmptyFrame,
  #[error("目标尺寸必须大于 0")]
  ZeroTargetSize,
}

/// 原图与 S×S 输入之间的几何变换
///
/// `scale = min(S / w, S / h)`，缩放后的图像居中放置，
/// 两侧的填充量可能是半像素。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxInfo {
  pub size: u32,
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub orig_width: u32,
  pub orig_height: u32,
}

impl LetterboxInfo {
  pub fn new(orig_width: u32, orig_height: u32, size: u32) -> Result<Self, PreprocessError> {
    if orig_width == 0 || orig_height == 0 {
      return Err(PreprocessError::EmptyFrame);
    }
    if size == 0 {
      return Err(PreprocessError::ZeroTargetSize);
    }

    let s = size as f64;
    let scale = (s / orig_width as f64).min(s / orig_height as f64);
    let (new_w, new_h) = Self::dims_for(orig_width, orig_height, size, scale);

    Ok(Self {
      size,
      scale: scale as f32,
      pad_x: (size - new_w) as f32 / 2.0,
      pad_y: (size - new_h) as f32 / 2.0,
      orig_width,
      orig_height,
    })
  }

  fn dims_for(width: u32, height: u32, size: u32, scale: f64) -> (u32, u32) {
    // 截断取整，至少 1 像素
    let new_w = ((width as f64 * scale) as u32).clamp(1, size);
    let new_h = ((height as f64 * scale) as u32).clamp(1, size);
    (new_w, new_h)
  }

  /// 缩放后（未填充）的图像尺寸
  pub fn resized_dims(&self) -> (u32, u32) {
    let s = self.size as f64;
    let scale = (s / self.orig_width as f64).min(s / self.orig_height as f64);
    Self::dims_for(self.orig_width, self.orig_height, self.size, scale)
  }

  /// 输入坐标 -> 原图坐标
  pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
    ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
  }

  /// 原图坐标 -> 输入坐标
  pub fn to_letterbox(&self, x: f32, y: f32) -> (f32, f32) {
    (x * self.scale + self.pad_x, y * self.scale + self.pad_y)
  }
}

/// 预处理结果：`[1, 3, S, S]` 的 RGB 平面数据，取值 `[0, 1]`
#[derive(Debug, Clone)]
pub struct PreprocessedInput {
  pub data: Box<[f32]>,
  pub info: LetterboxInfo,
}

impl PreprocessedInput {
  pub fn size(&self) -> u32 {
    self.info.size
  }
}

/// 将 BGR 帧等比缩放到 S×S，并转为 CHW 的 RGB 浮点张量
pub fn letterbox(frame: &BgrFrame, size: u32) -> Result<PreprocessedInput, PreprocessError> {
  if frame.is_empty() {
    return Err(PreprocessError::EmptyFrame);
  }
  let info = LetterboxInfo::new(frame.width(), frame.height(), size)?;
  let (new_w, new_h) = info.resized_dims();

  // 缩放只做插值，不关心通道含义，直接把 BGR 当三通道缓冲处理
  let view: ImageBuffer<Rgb<u8>, &[u8]> =
    ImageBuffer::from_raw(frame.width(), frame.height(), frame.as_bgr())
      .ok_or(PreprocessError::EmptyFrame)?;
  let resized = image::imageops::resize(&view, new_w, new_h, FilterType::Triangle);

  let side = size as usize;
  let plane = side * side;
  let fill = LETTERBOX_FILL as f32 / 255.0;
  let mut data = vec![fill; BGR_CHANNELS * plane].into_boxed_slice();

  let offset_x = info.pad_x.floor() as usize;
  let offset_y = info.pad_y.floor() as usize;

  for (x, y, pixel) in resized.enumerate_pixels() {
    let dx = offset_x + x as usize;
    let dy = offset_y + y as usize;
    if dx >= side || dy >= side {
      continue;
    }
    let idx = dy * side + dx;
    // RGB 平面依次取 BGR 像素的 2、1、0 通道
    for c in 0..BGR_CHANNELS {
      data[c * plane + idx] = pixel.0[2 - c] as f32 / 255.0;
    }
  }

  Ok(PreprocessedInput { data, info })
}
