// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/config.rs - 检测与采集参数
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

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_IMAGE_SIZE: u32 = 128;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
pub const DEFAULT_LABEL: &str = "uav";
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);
pub const DEFAULT_JPEG_QUALITY: u8 = 90;
pub const DEFAULT_STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("图像尺寸必须大于 0")]
  ZeroImageSize,
  #[error("{name} 必须位于 [0, 1] 区间, 实际为 {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("JPEG 质量必须位于 1..=100, 实际为 {0}")]
  JpegQuality(u8),
}

/// 检测器参数：正方形输入尺寸、置信度与 NMS 阈值
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  pub image_size: u32,
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
  pub label: String,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      image_size: DEFAULT_IMAGE_SIZE,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      label: DEFAULT_LABEL.to_string(),
    }
  }
}

impl DetectorConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.image_size == 0 {
      return Err(ConfigError::ZeroImageSize);
    }
    check_unit("confidence_threshold", self.confidence_threshold)?;
    check_unit("nms_threshold", self.nms_threshold)?;
    Ok(())
  }
}

/// 采集循环参数
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
  /// 每次迭代后的固定休眠
  pub frame_interval: Duration,
  /// 实时设备读取失败后的重试间隔
  pub retry_backoff: Duration,
  pub jpeg_quality: u8,
  pub stats_log_interval: Duration,
  /// GStreamer appsink 单次拉取的超时
  pub pull_timeout: Duration,
  /// 处理到指定帧数后退出，`None` 表示不限制
  pub max_frames: Option<u64>,
}

impl Default for CaptureConfig {
  fn default() -> Self {
    Self {
      frame_interval: DEFAULT_FRAME_INTERVAL,
      retry_backoff: DEFAULT_RETRY_BACKOFF,
      jpeg_quality: DEFAULT_JPEG_QUALITY,
      stats_log_interval: DEFAULT_STATS_LOG_INTERVAL,
      pull_timeout: DEFAULT_PULL_TIMEOUT,
      max_frames: None,
    }
  }
}

impl CaptureConfig {
  pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(1..=100).contains(&self.jpeg_quality) {
      return Err(ConfigError::JpegQuality(self.jpeg_quality));
    }
    Ok(())
  }
}

fn check_unit(name: &'static str, value: f32) -> Result<(), ConfigError> {
  if !(0.0..=1.0).contains(&value) {
    return Err(ConfigError::ThresholdOutOfRange { name, value });
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    assert!(DetectorConfig::default().validate().is_ok());
    assert!(CaptureConfig::default().validate().is_ok());
  }

  #[test]
  fn rejects_out_of_range_values() {
    let config = DetectorConfig {
      nms_threshold: 1.5,
      ..Default::default()
    };
    assert_eq!(
      config.validate(),
      Err(ConfigError::ThresholdOutOfRange {
        name: "nms_threshold",
        value: 1.5
      })
    );

    let config = DetectorConfig {
      image_size: 0,
      ..Default::default()
    };
    assert_eq!(config.validate(), Err(ConfigError::ZeroImageSize));

    let capture = CaptureConfig {
      jpeg_quality: 0,
      ..Default::default()
    };
    assert_eq!(capture.validate(), Err(ConfigError::JpegQuality(0)));
  }

  #[test]
  fn frame_limit_is_set_on_the_capture_config() {
    let config = CaptureConfig::default().with_max_frames(Some(7));
    assert_eq!(config.max_frames, Some(7));
    assert!(config.validate().is_ok());
    assert_eq!(config.with_max_frames(None).max_frames, None);
  }
}
