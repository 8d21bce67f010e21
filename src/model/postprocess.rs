// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/model/postprocess.rs - 输出解码与非极大值抑制
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

use tracing::{debug, error, warn};

use crate::config::DetectorConfig;

use super::{Detection, DetectionSet, LetterboxInfo, RawOutput, SINGLE_CLASS_ID};

/// 每个锚点至少包含 x、y、w、h、置信度
pub const MIN_FEATURES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostprocessParams {
  pub input_size: u32,
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
}

impl From<&DetectorConfig> for PostprocessParams {
  fn from(config: &DetectorConfig) -> Self {
    Self {
      input_size: config.image_size,
      confidence_threshold: config.confidence_threshold,
      nms_threshold: config.nms_threshold,
    }
  }
}

/// 部分导出的模型给出百分制置信度
pub fn normalize_confidence(confidence: f32) -> f32 {
  if confidence > 1.0 {
    confidence / 100.0
  } else {
    confidence
  }
}

/// 解码原始输出、映射回原图坐标并执行 NMS
///
/// 输出异常时记录日志并返回空结果，单帧失败不影响采集循环。
pub fn postprocess(
  raw: &RawOutput,
  info: &LetterboxInfo,
  params: &PostprocessParams,
) -> DetectionSet {
  let candidates = decode(raw, info, params);
  let total = candidates.len();
  let kept = non_max_suppression(candidates, params.nms_threshold);
  debug!("NMS: {} 个候选框, 保留 {} 个", total, kept.len());
  DetectionSet::from(kept)
}

fn decode(raw: &RawOutput, info: &LetterboxInfo, params: &PostprocessParams) -> Vec<Detection> {
  let features = raw.num_features;
  if features < MIN_FEATURES {
    error!("模型输出特征数 {} 少于 {}", features, MIN_FEATURES);
    return Vec::new();
  }

  // 行跨度始终取形状中的锚点数，长度不足时只解码数据覆盖到的锚点
  let stride = raw.num_anchors;
  let len = raw.data.len();
  let mut anchors = stride;
  if len != stride * features {
    anchors = stride.min(len / features);
    warn!(
      "输出长度 {} 与形状 {}x{} 不符, 按 {} 个锚点解码",
      len, features, stride, anchors
    );
  }
  if anchors == 0 {
    return Vec::new();
  }

  let data = &raw.data;
  let at = |feature: usize, anchor: usize| data[feature * stride + anchor];
  let size = info.size as f32;
  let orig_w = info.orig_width as f32;
  let orig_h = info.orig_height as f32;

  let mut candidates = Vec::new();
  for i in 0..anchors {
    if 4 * stride + i >= len {
      continue;
    }
    let mut x = at(0, i);
    let mut y = at(1, i);
    let mut w = at(2, i);
    let mut h = at(3, i);
    let confidence = normalize_confidence(at(4, i));

    if i < 3 {
      debug!(
        "锚点 {}: x={:.3}, y={:.3}, w={:.3}, h={:.3}, conf={:.3}",
        i, x, y, w, h, confidence
      );
    }

    // NaN 不会大于阈值，同样被过滤
    if !(confidence > params.confidence_threshold) {
      continue;
    }
    if ![x, y, w, h, confidence].iter().all(|v| v.is_finite()) {
      debug!("丢弃非有限值锚点 {}", i);
      continue;
    }

    // 四个值都不超过 1 视为归一化坐标
    if x <= 1.0 && y <= 1.0 && w <= 1.0 && h <= 1.0 {
      x *= size;
      y *= size;
      w *= size;
      h *= size;
    }

    let (ox, oy) = info.to_original(x, y);
    let ow = w / info.scale;
    let oh = h / info.scale;

    if !(ow > 0.0 && oh > 0.0) || ow > 2.0 * orig_w || oh > 2.0 * orig_h {
      debug!("丢弃异常框: w={:.1}, h={:.1}", ow, oh);
      continue;
    }

    candidates.push(Detection {
      x: ox.clamp(0.0, orig_w),
      y: oy.clamp(0.0, orig_h),
      w: ow,
      h: oh,
      confidence: confidence.clamp(0.0, 1.0),
      class_id: SINGLE_CLASS_ID,
    });
  }

  candidates
}

/// 贪心 NMS：按置信度降序，抑制与已保留框 IoU 大于阈值的框
pub fn non_max_suppression(mut candidates: Vec<Detection>, threshold: f32) -> Vec<Detection> {
  // 稳定排序，置信度相同时保持原始顺序
  candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut suppressed = vec![false; candidates.len()];
  let mut kept = Vec::with_capacity(candidates.len());

  for i in 0..candidates.len() {
    if suppressed[i] {
      continue;
    }
    let current = candidates[i];
    kept.push(current);

    for j in (i + 1)..candidates.len() {
      if !suppressed[j] && current.iou(&candidates[j]) > threshold {
        suppressed[j] = true;
      }
    }
  }

  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params() -> PostprocessParams {
    PostprocessParams {
      input_size: 128,
      confidence_threshold: 0.5,
      nms_threshold: 0.4,
    }
  }

  /// 按特征优先布局组装输出
  fn raw_from_anchors(anchors: &[[f32; 5]]) -> RawOutput {
    let n = anchors.len();
    let mut data = vec![0.0; 5 * n];
    for (i, anchor) in anchors.iter().enumerate() {
      for (f, value) in anchor.iter().enumerate() {
        data[f * n + i] = *value;
      }
    }
    RawOutput::new(data, n, 5)
  }

  fn det(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> Detection {
    Detection {
      x,
      y,
      w,
      h,
      confidence,
      class_id: SINGLE_CLASS_ID,
    }
  }

  #[test]
  fn confidence_normalization() {
    assert_eq!(normalize_confidence(0.9), 0.9);
    assert_eq!(normalize_confidence(1.0), 1.0);
    assert!((normalize_confidence(150.0) - 1.5).abs() < 1e-6);
    assert!((normalize_confidence(1.5) - 0.015).abs() < 1e-6);
  }

  #[test]
  fn pixel_coordinates_map_back_to_original() {
    let info = LetterboxInfo::new(640, 480, 128).unwrap();
    // 原图 (320, 240) 的 100x50 框
    let raw = raw_from_anchors(&[[64.0, 64.0, 20.0, 10.0, 0.9]]);
    let set = postprocess(&raw, &info, &params());

    assert_eq!(set.len(), 1);
    let d = set.items[0];
    assert!((d.x - 320.0).abs() < 0.5);
    assert!((d.y - 240.0).abs() < 0.5);
    assert!((d.w - 100.0).abs() < 0.5);
    assert!((d.h - 50.0).abs() < 0.5);
    assert_eq!(d.class_id, SINGLE_CLASS_ID);
  }

  #[test]
  fn normalized_coordinates_are_scaled_first() {
    let info = LetterboxInfo::new(640, 480, 128).unwrap();
    let raw = raw_from_anchors(&[[0.5, 0.5, 20.0 / 128.0, 10.0 / 128.0, 0.9]]);
    let set = postprocess(&raw, &info, &params());

    assert_eq!(set.len(), 1);
    assert!((set.items[0].x - 320.0).abs() < 0.5);
    assert!((set.items[0].w - 100.0).abs() < 0.5);
  }

  #[test]
  fn low_confidence_and_degenerate_boxes_are_dropped() {
    let info = LetterboxInfo::new(640, 480, 128).unwrap();
    let raw = raw_from_anchors(&[
      [64.0, 64.0, 20.0, 10.0, 0.5],
      [64.0, 64.0, 0.0, 10.0, 0.9],
      [64.0, 64.0, 20.0, -3.0, 0.9],
      [64.0, 64.0, 300.0, 10.0, 0.9],
    ]);
    assert!(postprocess(&raw, &info, &params()).is_empty());
  }

  #[test]
  fn percent_confidence_is_accepted() {
    let info = LetterboxInfo::new(128, 128, 128).unwrap();
    let raw = raw_from_anchors(&[[64.0, 64.0, 20.0, 10.0, 87.0]]);
    let set = postprocess(&raw, &info, &params());
    assert_eq!(set.len(), 1);
    assert!((set.items[0].confidence - 0.87).abs() < 1e-6);
  }

  #[test]
  fn centers_are_clamped_to_the_frame() {
    let info = LetterboxInfo::new(640, 480, 128).unwrap();
    // 中心落在上方填充区
    let raw = raw_from_anchors(&[[64.0, 4.0, 20.0, 10.0, 0.9]]);
    let set = postprocess(&raw, &info, &params());
    assert_eq!(set.len(), 1);
    assert_eq!(set.items[0].y, 0.0);
  }

  #[test]
  fn too_few_features_yield_nothing() {
    let info = LetterboxInfo::new(128, 128, 128).unwrap();
    let raw = RawOutput::new(vec![0.9; 8], 2, 4);
    assert!(postprocess(&raw, &info, &params()).is_empty());
  }

  #[test]
  fn short_buffer_keeps_the_declared_stride() {
    let info = LetterboxInfo::new(128, 128, 128).unwrap();
    // 4 个锚点按跨度 4 排列，末尾缺一个值
    let mut raw = raw_from_anchors(&[
      [64.0, 64.0, 20.0, 10.0, 0.9],
      [30.0, 30.0, 10.0, 10.0, 0.1],
      [90.0, 90.0, 10.0, 10.0, 0.1],
      [10.0, 10.0, 10.0, 10.0, 0.9],
    ]);
    raw.data.pop();
    let set = postprocess(&raw, &info, &params());

    assert_eq!(set.len(), 1);
    let d = set.items[0];
    assert!((d.x - 64.0).abs() < 1e-4);
    assert!((d.y - 64.0).abs() < 1e-4);
    assert!((d.w - 20.0).abs() < 1e-4);
    assert!((d.h - 10.0).abs() < 1e-4);
  }

  #[test]
  fn anchors_past_the_buffer_end_are_skipped() {
    let info = LetterboxInfo::new(128, 128, 128).unwrap();
    // 声称 4 个锚点，但只有前两个锚点的数据（跨度 4）
    let mut raw = raw_from_anchors(&[
      [30.0, 30.0, 10.0, 10.0, 0.9],
      [90.0, 90.0, 10.0, 10.0, 0.8],
      [50.0, 50.0, 10.0, 10.0, 0.9],
      [70.0, 70.0, 10.0, 10.0, 0.9],
    ]);
    raw.data.truncate(4 * 4 + 2);
    let set = postprocess(&raw, &info, &params());

    assert_eq!(set.len(), 2);
    assert!((set.items[0].x - 30.0).abs() < 1e-4);
    assert!((set.items[1].x - 90.0).abs() < 1e-4);
  }

  #[test]
  fn non_finite_values_are_dropped() {
    let info = LetterboxInfo::new(128, 128, 128).unwrap();
    let raw = raw_from_anchors(&[
      [64.0, 64.0, 20.0, 10.0, f32::NAN],
      [f32::NAN, 64.0, 20.0, 10.0, 0.9],
      [64.0, f32::INFINITY, 20.0, 10.0, 0.9],
      [64.0, 64.0, 20.0, 10.0, f32::INFINITY],
    ]);
    assert!(postprocess(&raw, &info, &params()).is_empty());

    let raw = RawOutput::new(vec![64.0, 64.0, 20.0, 10.0, f32::NAN], 1, 5);
    assert!(postprocess(&raw, &info, &params()).is_empty());
  }

  #[test]
  fn extra_features_are_ignored() {
    let info = LetterboxInfo::new(128, 128, 128).unwrap();
    let mut data = vec![50.0, 50.0, 10.0, 10.0, 0.9];
    data.extend([0.1, 0.2]);
    let raw = RawOutput::new(data, 1, 7);
    let set = postprocess(&raw, &info, &params());
    assert_eq!(set.len(), 1);
    assert!((set.items[0].x - 50.0).abs() < 1e-4);
  }

  #[test]
  fn overlapping_pair_keeps_the_stronger_box() {
    let kept = non_max_suppression(
      vec![
        det(50.0, 50.0, 90.0, 100.0, 0.8),
        det(50.0, 50.0, 100.0, 100.0, 0.9),
      ],
      0.4,
    );
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].confidence, 0.9);
  }

  #[test]
  fn pair_below_threshold_is_kept() {
    // IoU = 1/3
    let kept = non_max_suppression(
      vec![
        det(50.0, 50.0, 100.0, 100.0, 0.9),
        det(100.0, 50.0, 100.0, 100.0, 0.8),
      ],
      0.4,
    );
    assert_eq!(kept.len(), 2);
    assert!(kept[0].confidence >= kept[1].confidence);
  }

  #[test]
  fn nms_is_idempotent_and_sorted() {
    let boxes = vec![
      det(10.0, 10.0, 20.0, 20.0, 0.6),
      det(12.0, 11.0, 20.0, 20.0, 0.7),
      det(200.0, 200.0, 30.0, 30.0, 0.95),
      det(205.0, 200.0, 30.0, 30.0, 0.9),
      det(400.0, 50.0, 10.0, 10.0, 0.55),
    ];
    let once = non_max_suppression(boxes, 0.4);
    let twice = non_max_suppression(once.clone(), 0.4);

    assert_eq!(once, twice);
    assert_eq!(once.len(), 3);
    assert!(once.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    for (i, a) in once.iter().enumerate() {
      for b in &once[i + 1..] {
        assert!(a.iou(b) <= 0.4);
      }
    }
  }

  #[test]
  fn empty_input_yields_empty_output() {
    assert!(non_max_suppression(Vec::new(), 0.4).is_empty());
  }
}
