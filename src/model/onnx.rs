// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use std::path::{Path, PathBuf};

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::DEFAULT_IMAGE_SIZE;

use super::{InferenceError, Model, PreprocessedInput, RawOutput};

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
}

pub struct OnnxModelBuilder {
  model_path: PathBuf,
  image_size: u32,
  intra_threads: Option<usize>,
}

impl OnnxModelBuilder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      image_size: DEFAULT_IMAGE_SIZE,
      intra_threads: None,
    }
  }

  pub fn image_size(mut self, image_size: u32) -> Self {
    self.image_size = image_size;
    self
  }

  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = Some(threads);
    self
  }

  pub fn build(self) -> Result<OnnxModel, OnnxModelError> {
    info!("加载模型文件: {}", self.model_path.display());
    let metadata = std::fs::metadata(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    if let Some(threads) = self.intra_threads {
      builder = builder.with_intra_threads(threads)?;
    }
    let session = builder.commit_from_file(&self.model_path)?;

    let input_name = match session.inputs.first() {
      Some(input) => input.name.clone(),
      None => {
        error!("模型没有输入");
        return Err(OnnxModelError::ModelInvalid("模型没有输入".to_string()));
      }
    };
    if session.outputs.is_empty() {
      error!("模型没有输出");
      return Err(OnnxModelError::ModelInvalid("模型没有输出".to_string()));
    }

    debug!(
      "模型输入: {:?}, 输出: {:?}",
      session.inputs.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
      session.outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>()
    );
    info!("模型加载完成, 输入尺寸 {}x{}", self.image_size, self.image_size);

    Ok(OnnxModel {
      session,
      input_name,
      image_size: self.image_size,
    })
  }
}

/// 单输入单输出的检测模型会话
pub struct OnnxModel {
  session: Session,
  input_name: String,
  image_size: u32,
}

impl OnnxModel {
  pub fn image_size(&self) -> u32 {
    self.image_size
  }
}

impl Model for OnnxModel {
  type Input = PreprocessedInput;
  type Output = RawOutput;
  type Error = InferenceError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let side = self.image_size as usize;
    let expected = 3 * side * side;
    if input.data.len() != expected {
      return Err(InferenceError::InputSizeMismatch {
        expected,
        actual: input.data.len(),
      });
    }

    let tensor = Tensor::from_array(([1usize, 3, side, side], input.data.to_vec()))?;
    let outputs = self
      .session
      .run(ort::inputs![self.input_name.as_str() => tensor])?;

    if outputs.len() == 0 {
      return Err(InferenceError::MissingOutput);
    }
    let view = outputs[0].try_extract_array::<f32>()?;
    RawOutput::from_array(view)
  }
}
