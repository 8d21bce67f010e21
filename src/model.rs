// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/model.rs - 模型
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

use ndarray::ArrayViewD;
use thiserror::Error;
use tracing::debug;

use crate::{config::DetectorConfig, frame::BgrFrame};

pub mod letterbox;
pub mod onnx;
pub mod postprocess;

pub use self::letterbox::{LetterboxInfo, PreprocessError, PreprocessedInput, letterbox};
pub use self::onnx::{OnnxModel, OnnxModelBuilder, OnnxModelError};
pub use self::postprocess::{MIN_FEATURES, PostprocessParams, non_max_suppression, postprocess};

/// 推理适配层：固定形状输入，原始输出
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 单类别模型唯一的类别编号
pub const SINGLE_CLASS_ID: u32 = 0;

/// 原图像素坐标下的中心点形式边界框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
  pub confidence: f32,
  pub class_id: u32,
}

impl Detection {
  pub fn left(&self) -> f32 {
    self.x - self.w / 2.0
  }

  pub fn top(&self) -> f32 {
    self.y - self.h / 2.0
  }

  pub fn right(&self) -> f32 {
    self.x + self.w / 2.0
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.h / 2.0
  }

  /// 交并比；零面积或不相交时为 0
  pub fn iou(&self, other: &Detection) -> f32 {
    let left = self.left().max(other.left());
    let top = self.top().max(other.top());
    let right = self.right().min(other.right());
    let bottom = self.bottom().min(other.bottom());

    if left >= right || top >= bottom {
      return 0.0;
    }

    let intersection = (right - left) * (bottom - top);
    let union = self.w * self.h + other.w * other.h - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

/// NMS 之后的检测结果，按置信度降序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
  pub items: Box<[Detection]>,
}

impl DetectionSet {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectionSet {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl<'a> IntoIterator for &'a DetectionSet {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(#[from] ort::Error),
  #[error("无法识别的输出形状: {0:?}")]
  UnrecognizedShape(Vec<usize>),
  #[error("输入长度不匹配: 期望 {expected}, 实际 {actual}")]
  InputSizeMismatch { expected: usize, actual: usize },
  #[error("模型没有输出")]
  MissingOutput,
}

/// 模型的原始输出，按行优先展开
///
/// 约定布局为特征优先：先是全部 x，然后全部 y、w、h、置信度，
/// 每行长度为 `num_anchors`。
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
  pub data: Vec<f32>,
  pub num_anchors: usize,
  pub num_features: usize,
}

impl RawOutput {
  pub fn new(data: Vec<f32>, num_anchors: usize, num_features: usize) -> Self {
    Self {
      data,
      num_anchors,
      num_features,
    }
  }

  /// 从输出张量构造，接受 `[1, F, N]` 与 `[F, N]` 两种形状
  ///
  /// 行数大于列数且列数不少于 5 时视为锚点优先的 `[1, N, F]` / `[N, F]`，
  /// 先转置为特征优先再展开。
  pub fn from_array(view: ArrayViewD<'_, f32>) -> Result<Self, InferenceError> {
    let shape = view.shape().to_vec();
    let (rows, cols) = match shape.as_slice() {
      [1, rows, cols] => (*rows, *cols),
      [rows, cols] => (*rows, *cols),
      _ => return Err(InferenceError::UnrecognizedShape(shape)),
    };

    let anchor_major = rows > cols && cols >= MIN_FEATURES;
    let (num_features, num_anchors, view) = if anchor_major {
      // 反转全部轴：[1, N, F] -> [F, N, 1]，[N, F] -> [F, N]
      (cols, rows, view.reversed_axes())
    } else {
      (rows, cols, view)
    };

    // 逻辑顺序迭代即行优先，与内存布局无关
    let data: Vec<f32> = view.iter().copied().collect();
    debug!(
      "模型输出形状 {:?}: {} 个锚点, 每个 {} 个特征",
      shape, num_anchors, num_features
    );

    Ok(Self::new(data, num_anchors, num_features))
  }
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
}

/// 预处理、推理与后处理串成的单帧检测器
pub struct Detector<M> {
  model: M,
  params: PostprocessParams,
}

impl<M> Detector<M>
where
  M: Model<Input = PreprocessedInput, Output = RawOutput, Error = InferenceError>,
{
  pub fn new(model: M, config: &DetectorConfig) -> Self {
    Self {
      model,
      params: PostprocessParams::from(config),
    }
  }

  pub fn params(&self) -> &PostprocessParams {
    &self.params
  }

  pub fn detect(&mut self, frame: &BgrFrame) -> Result<DetectionSet, DetectError> {
    let input = letterbox(frame, self.params.input_size)?;
    let raw = self.model.infer(&input)?;
    Ok(postprocess(&raw, &input.info, &self.params))
  }
}

#[cfg(test)]
mod tests {
  use ndarray::{Array2, Array3, ShapeBuilder};

  use super::*;

  fn det(x: f32, y: f32, w: f32, h: f32) -> Detection {
    Detection {
      x,
      y,
      w,
      h,
      confidence: 0.9,
      class_id: SINGLE_CLASS_ID,
    }
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let a = det(50.0, 50.0, 20.0, 10.0);
    assert!((a.iou(&a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_of_disjoint_or_degenerate_boxes_is_zero() {
    let a = det(10.0, 10.0, 10.0, 10.0);
    let b = det(100.0, 100.0, 10.0, 10.0);
    assert_eq!(a.iou(&b), 0.0);

    let flat = det(10.0, 10.0, 0.0, 10.0);
    assert_eq!(a.iou(&flat), 0.0);
  }

  #[test]
  fn iou_of_nested_boxes() {
    let outer = det(50.0, 50.0, 100.0, 100.0);
    let inner = det(50.0, 50.0, 90.0, 100.0);
    assert!((outer.iou(&inner) - 0.9).abs() < 1e-5);
  }

  #[test]
  fn raw_output_accepts_three_dimensional_tensor() {
    let array = Array3::from_shape_fn((1, 5, 4), |(_, f, a)| (f * 10 + a) as f32);
    let raw = RawOutput::from_array(array.view().into_dyn()).unwrap();
    assert_eq!(raw.num_features, 5);
    assert_eq!(raw.num_anchors, 4);
    assert_eq!(raw.data[0..4], [0.0, 1.0, 2.0, 3.0]);
    assert_eq!(raw.data[4], 10.0);
  }

  #[test]
  fn raw_output_flattens_in_row_major_order_for_any_layout() {
    // 列优先存储的二维张量也要按逻辑行优先展开
    let array = Array2::from_shape_fn((5, 3).f(), |(f, a)| (f * 10 + a) as f32);
    let raw = RawOutput::from_array(array.view().into_dyn()).unwrap();
    assert_eq!(raw.num_anchors, 3);
    assert_eq!(raw.data[0..6], [0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
  }

  #[test]
  fn anchor_major_tensor_is_transposed() {
    // [1, N, 5]：每行一个锚点
    let array = Array3::from_shape_fn((1, 336, 5), |(_, a, f)| (f * 1000 + a) as f32);
    let raw = RawOutput::from_array(array.view().into_dyn()).unwrap();
    assert_eq!(raw.num_features, 5);
    assert_eq!(raw.num_anchors, 336);
    assert_eq!(raw.data.len(), 5 * 336);
    assert_eq!(raw.data[0..3], [0.0, 1.0, 2.0]);
    assert_eq!(raw.data[336], 1000.0);
    assert_eq!(raw.data[4 * 336 + 7], 4007.0);

    let array = Array2::from_shape_fn((8, 6), |(a, f)| (f * 100 + a) as f32);
    let raw = RawOutput::from_array(array.view().into_dyn()).unwrap();
    assert_eq!((raw.num_features, raw.num_anchors), (6, 8));
    assert_eq!(raw.data[8..10], [100.0, 101.0]);
  }

  #[test]
  fn anchor_major_output_decodes_to_the_right_box() {
    let mut array = Array3::<f32>::zeros((1, 336, 5));
    for (f, value) in [64.0, 64.0, 20.0, 10.0, 0.9].into_iter().enumerate() {
      array[[0, 17, f]] = value;
    }
    let raw = RawOutput::from_array(array.view().into_dyn()).unwrap();
    let info = LetterboxInfo::new(128, 128, 128).unwrap();
    let params = PostprocessParams {
      input_size: 128,
      confidence_threshold: 0.5,
      nms_threshold: 0.4,
    };
    let set = postprocess(&raw, &info, &params);

    assert_eq!(set.len(), 1);
    assert!((set.items[0].x - 64.0).abs() < 1e-4);
    assert!((set.items[0].w - 20.0).abs() < 1e-4);
  }

  #[test]
  fn raw_output_rejects_unknown_shapes() {
    let array = ndarray::Array4::<f32>::zeros((1, 1, 5, 4));
    assert!(matches!(
      RawOutput::from_array(array.view().into_dyn()),
      Err(InferenceError::UnrecognizedShape(_))
    ));

    let batched = Array3::<f32>::zeros((2, 5, 4));
    assert!(matches!(
      RawOutput::from_array(batched.view().into_dyn()),
      Err(InferenceError::UnrecognizedShape(_))
    ));
  }
}
