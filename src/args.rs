// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use droneguard::config::{
  CaptureConfig, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_FRAME_INTERVAL, DEFAULT_IMAGE_SIZE,
  DEFAULT_JPEG_QUALITY, DEFAULT_LABEL, DEFAULT_NMS_THRESHOLD, DetectorConfig,
};

/// DroneGuard 无人机检测推流
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "FILE")]
  pub model: PathBuf,

  /// 视频源
  /// - 数字: 本地摄像头编号，如 0
  /// - http(s)://: 网络视频流
  /// - 其他: 视频或图片文件路径
  #[arg(long, value_name = "SOURCE")]
  pub source: String,

  /// 模型输入尺寸（正方形边长）
  #[arg(long, default_value_t = DEFAULT_IMAGE_SIZE, value_name = "PIXELS")]
  pub image_size: u32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_NMS_THRESHOLD, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 检测框标签
  #[arg(long, default_value = DEFAULT_LABEL)]
  pub label: String,

  /// JPEG 质量 (1 - 100)
  #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
  pub jpeg_quality: u8,

  /// 每帧之后的休眠毫秒数
  #[arg(long, default_value_t = DEFAULT_FRAME_INTERVAL.as_millis() as u64, value_name = "MS")]
  pub frame_interval_ms: u64,

  /// 推理线程数，不指定时由 ONNX Runtime 决定
  #[arg(long, value_name = "COUNT")]
  pub threads: Option<usize>,

  /// 最大处理帧数，不指定时持续运行
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,

  /// 将最新发布的帧定期写入该文件
  #[arg(long, value_name = "FILE")]
  pub snapshot: Option<PathBuf>,
}

impl Args {
  pub fn detector_config(&self) -> DetectorConfig {
    DetectorConfig {
      image_size: self.image_size,
      confidence_threshold: self.confidence,
      nms_threshold: self.nms_threshold,
      label: self.label.clone(),
    }
  }

  pub fn capture_config(&self) -> CaptureConfig {
    CaptureConfig {
      frame_interval: Duration::from_millis(self.frame_interval_ms),
      jpeg_quality: self.jpeg_quality,
      ..Default::default()
    }
    .with_max_frames(self.max_frames)
  }
}
