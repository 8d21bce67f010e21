// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/output/encode.rs - JPEG 编码
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

use image::{ExtendedColorType, ImageEncoder, codecs::jpeg::JpegEncoder};
use thiserror::Error;

use crate::{config::DEFAULT_JPEG_QUALITY, frame::BgrFrame};

pub const PLACEHOLDER_WIDTH: u32 = 320;
pub const PLACEHOLDER_HEIGHT: u32 = 240;
/// 占位帧颜色（BGR 绿色）
pub const PLACEHOLDER_COLOR: [u8; 3] = [0, 255, 0];

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("无法编码空帧")]
  EmptyFrame,
  #[error("JPEG 编码错误: {0}")]
  Image(#[from] image::ImageError),
}

pub fn encode_jpeg(frame: &BgrFrame, quality: u8) -> Result<Vec<u8>, EncodeError> {
  if frame.is_empty() {
    return Err(EncodeError::EmptyFrame);
  }

  let rgb = frame.to_rgb_image();
  let mut buffer = Vec::new();
  JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).write_image(
    rgb.as_raw(),
    rgb.width(),
    rgb.height(),
    ExtendedColorType::Rgb8,
  )?;

  Ok(buffer)
}

/// 首帧产出前发布的纯绿占位图
pub fn placeholder_jpeg() -> Result<Vec<u8>, EncodeError> {
  let frame = BgrFrame::filled(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, PLACEHOLDER_COLOR);
  encode_jpeg(&frame, DEFAULT_JPEG_QUALITY)
}
