// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像检测示例
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use droneguard::{
  config::{
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IMAGE_SIZE, DEFAULT_LABEL, DEFAULT_NMS_THRESHOLD,
    DetectorConfig,
  },
  input::ImageFileInput,
  model::{Detector, OnnxModelBuilder},
  output::{Draw, SaveImageFileOutput},
  task::{OneShotTask, Task},
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "对单张图像执行无人机检测", long_about = None)]
struct Args {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "FILE")]
  model: PathBuf,

  /// 输入图像
  #[arg(long, value_name = "FILE")]
  input: PathBuf,

  /// 标注结果输出路径
  #[arg(long, value_name = "FILE")]
  output: PathBuf,

  #[arg(long, default_value_t = DEFAULT_IMAGE_SIZE)]
  image_size: u32,

  #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
  confidence: f32,

  #[arg(long, default_value_t = DEFAULT_NMS_THRESHOLD)]
  nms_threshold: f32,

  #[arg(long, default_value = DEFAULT_LABEL)]
  label: String,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();
  let args = Args::parse();

  let config = DetectorConfig {
    image_size: args.image_size,
    confidence_threshold: args.confidence,
    nms_threshold: args.nms_threshold,
    label: args.label,
  };
  config.validate()?;

  let input = ImageFileInput::open(&args.input).context("无法读取输入图像")?;
  let model = OnnxModelBuilder::new(&args.model)
    .image_size(config.image_size)
    .build()
    .context("无法加载模型")?;
  let detector = Detector::new(model, &config);
  let output = SaveImageFileOutput::new(&args.output, Draw::new(config.label.clone())?);

  let detections = OneShotTask.run_task(input, detector, output)?;
  for d in &detections {
    info!(
      "{} {:.2} at ({:.0}, {:.0}, {:.0}x{:.0})",
      config.label, d.confidence, d.x, d.y, d.w, d.h
    );
  }
  info!("共检测到 {} 个目标", detections.len());

  Ok(())
}
