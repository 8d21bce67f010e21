// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{ImageBuffer, Rgb};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};

use crate::{
  frame::BgrFrame,
  model::{Detection, DetectionSet},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 3;
// 颜色均按 B、G、R 顺序
const BOX_COLOR: [u8; 3] = [0, 255, 0];
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

/// 帧内的像素矩形，右下角不包含
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
  pub left: i32,
  pub top: i32,
  pub right: i32,
  pub bottom: i32,
}

impl PixelBox {
  /// 裁剪到帧内，至少保留 1 像素
  pub fn clamped(detection: &Detection, width: u32, height: u32) -> Self {
    let (w, h) = (width as i32, height as i32);

    let left = (detection.left() as i32).clamp(0, w - 1);
    let top = (detection.top() as i32).clamp(0, h - 1);
    let right = (left + 1).max((detection.right() as i32).min(w));
    let bottom = (top + 1).max((detection.bottom() as i32).min(h));

    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn width(&self) -> u32 {
    (self.right - self.left) as u32
  }

  pub fn height(&self) -> u32 {
    (self.bottom - self.top) as u32
  }
}

pub struct Draw {
  font: FontRef<'static>,
  font_size: f32,
  label: String,
}

impl Draw {
  pub fn new(label: impl Into<String>) -> Result<Self, InvalidFont> {
    let font_data: &'static [u8] = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontRef::try_from_slice(font_data)?;

    Ok(Self {
      font,
      font_size: LABEL_FONT_SIZE,
      label: label.into(),
    })
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  /// 直接在帧上绘制检测框与 `"<标签> <置信度>"` 文本
  pub fn draw_detections(&self, frame: &mut BgrFrame, detections: &DetectionSet) {
    if frame.is_empty() || detections.is_empty() {
      return;
    }
    let (width, height) = (frame.width(), frame.height());

    // Rgb 在这里只是三通道容器，颜色常量已按 BGR 排列
    let Some(mut canvas) =
      ImageBuffer::<Rgb<u8>, &mut [u8]>::from_raw(width, height, frame.as_mut())
    else {
      return;
    };

    for detection in detections {
      let pixel_box = PixelBox::clamped(detection, width, height);
      self.draw_box(&mut canvas, &pixel_box);
      self.draw_label(&mut canvas, &pixel_box, detection.confidence);
    }
  }

  fn draw_box(&self, canvas: &mut ImageBuffer<Rgb<u8>, &mut [u8]>, pixel_box: &PixelBox) {
    // 向内逐层加粗
    for t in 0..BOX_THICKNESS {
      let w = pixel_box.width() as i32 - 2 * t;
      let h = pixel_box.height() as i32 - 2 * t;
      if w <= 0 || h <= 0 {
        break;
      }
      let rect = Rect::at(pixel_box.left + t, pixel_box.top + t).of_size(w as u32, h as u32);
      draw_hollow_rect_mut(canvas, rect, Rgb(BOX_COLOR));
    }
  }

  fn draw_label(
    &self,
    canvas: &mut ImageBuffer<Rgb<u8>, &mut [u8]>,
    pixel_box: &PixelBox,
    confidence: f32,
  ) {
    let text = format!("{} {:.2}", self.label, confidence);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, &self.font, &text);

    let label_w = text_w as i32 + 2 * LABEL_PADDING;
    let label_h = text_h as i32 + 2 * LABEL_PADDING;

    // 上方空间不足时放到框下方
    let label_y = if pixel_box.top >= label_h {
      pixel_box.top - label_h
    } else {
      pixel_box.bottom
    };
    let label_x = pixel_box.left;

    let rect = Rect::at(label_x, label_y).of_size(label_w.max(1) as u32, label_h.max(1) as u32);
    draw_filled_rect_mut(canvas, rect, Rgb(BOX_COLOR));
    draw_text_mut(
      canvas,
      Rgb(TEXT_COLOR),
      label_x + LABEL_PADDING,
      label_y + LABEL_PADDING,
      scale,
      &self.font,
      &text,
    );
  }
}

#[cfg(test)]
mod tests {
  use crate::model::SINGLE_CLASS_ID;

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
  fn boxes_are_clamped_with_minimum_size() {
    let inside = PixelBox::clamped(&det(50.0, 50.0, 20.0, 10.0), 100, 100);
    assert_eq!(
      inside,
      PixelBox {
        left: 40,
        top: 45,
        right: 60,
        bottom: 55
      }
    );

    let corner = PixelBox::clamped(&det(0.0, 0.0, 10.0, 10.0), 100, 100);
    assert_eq!((corner.left, corner.top, corner.right, corner.bottom), (0, 0, 5, 5));

    let outside = PixelBox::clamped(&det(1000.0, 1000.0, 10.0, 10.0), 100, 80);
    assert_eq!(outside.left, 99);
    assert_eq!(outside.top, 79);
    assert_eq!(outside.width(), 1);
    assert_eq!(outside.height(), 1);

    let flat = PixelBox::clamped(&det(50.0, 50.0, 0.0, 0.0), 100, 100);
    assert_eq!((flat.width(), flat.height()), (1, 1));
  }

  #[test]
  fn draws_box_edges_but_not_interior() {
    let draw = Draw::new("uav").unwrap();
    let mut frame = BgrFrame::with_shape(200, 200);
    let set = DetectionSet::from(vec![det(100.0, 120.0, 60.0, 60.0)]);

    draw.draw_detections(&mut frame, &set);

    assert_eq!(frame.pixel(70, 120), Some(BOX_COLOR));
    assert_eq!(frame.pixel(72, 120), Some(BOX_COLOR));
    assert_eq!(frame.pixel(100, 120), Some([0, 0, 0]));
  }

  #[test]
  fn label_is_rendered_near_the_box() {
    let draw = Draw::new("uav").unwrap();
    let mut frame = BgrFrame::with_shape(200, 200);
    let set = DetectionSet::from(vec![det(100.0, 120.0, 60.0, 60.0)]);

    draw.draw_detections(&mut frame, &set);

    // 框上方的标签背景
    let above = (0..90u32).any(|y| frame.pixel(75, y) == Some(BOX_COLOR));
    assert!(above);
  }

  #[test]
  fn label_moves_below_when_box_touches_top() {
    let draw = Draw::new("uav").unwrap();
    let mut frame = BgrFrame::with_shape(200, 200);
    let set = DetectionSet::from(vec![det(100.0, 10.0, 60.0, 20.0)]);

    draw.draw_detections(&mut frame, &set);

    // 框底为 y=20，标签背景应从这里开始
    assert_eq!(frame.pixel(75, 21), Some(BOX_COLOR));
  }

  #[test]
  fn empty_detections_leave_frame_untouched() {
    let draw = Draw::new("uav").unwrap();
    let mut frame = BgrFrame::filled(32, 32, [7, 8, 9]);
    let original = frame.clone();
    draw.draw_detections(&mut frame, &DetectionSet::default());
    assert_eq!(frame, original);
  }
}
