// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/output/save_image_file.rs - 保存标注后的图像文件
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

use thiserror::Error;
use tracing::info;

use crate::{
  frame::BgrFrame,
  model::DetectionSet,
  output::{Render, draw::Draw},
};

pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

impl SaveImageFileOutput {
  pub fn new(path: impl AsRef<Path>, draw: Draw) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
      draw,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save_image(&self, frame: &BgrFrame) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    frame.to_rgb_image().save(&self.path)?;
    info!("保存图像到文件: {}", self.path.display());

    Ok(())
  }
}

impl Render<BgrFrame, DetectionSet> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &BgrFrame, result: &DetectionSet) -> Result<(), Self::Error> {
    let mut annotated = frame.clone();
    self.draw.draw_detections(&mut annotated, result);
    self.save_image(&annotated)
  }
}

#[cfg(test)]
mod tests {
  use crate::model::{Detection, SINGLE_CLASS_ID};

  use super::*;

  #[test]
  fn creates_parent_directories_and_writes_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/out/annotated.png");
    let output = SaveImageFileOutput::new(&path, Draw::new("uav").unwrap());

    let frame = BgrFrame::filled(80, 60, [30, 30, 30]);
    let set = DetectionSet::from(vec![Detection {
      x: 40.0,
      y: 40.0,
      w: 20.0,
      h: 20.0,
      confidence: 0.75,
      class_id: SINGLE_CLASS_ID,
    }]);
    output.render_result(&frame, &set).unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (80, 60));
    // 左边框为绿色
    assert_eq!(saved.get_pixel(30, 40).0, [0, 255, 0]);
    // 原帧未被修改
    assert_eq!(frame.pixel(30, 40), Some([30, 30, 30]));
  }
}
