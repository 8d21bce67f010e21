// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// src/publisher.rs - 最新帧发布
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

use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering},
};

use arc_swap::ArcSwap;
use tracing::warn;

use crate::output::{EncodeError, placeholder_jpeg};

/// 一帧编码好的 JPEG，发布后不可变
#[derive(Debug, PartialEq, Eq)]
pub struct PublishedFrame {
  /// 0 表示占位帧
  pub sequence: u64,
  pub bytes: Box<[u8]>,
}

impl PublishedFrame {
  pub fn is_placeholder(&self) -> bool {
    self.sequence == 0
  }

  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }
}

impl AsRef<[u8]> for PublishedFrame {
  fn as_ref(&self) -> &[u8] {
    &self.bytes
  }
}

/// 单写多读的最新帧槽位
///
/// 写入是一次原子指针替换；读者拿到的 `Arc` 在替换后依旧有效，
/// 读写双方互不阻塞。
pub struct FramePublisher {
  current: ArcSwap<PublishedFrame>,
  placeholder: Arc<PublishedFrame>,
  sequence: AtomicU64,
}

impl FramePublisher {
  pub fn new() -> Result<Self, EncodeError> {
    Ok(Self::with_placeholder(placeholder_jpeg()?))
  }

  pub fn with_placeholder(bytes: Vec<u8>) -> Self {
    let placeholder = Arc::new(PublishedFrame {
      sequence: 0,
      bytes: bytes.into_boxed_slice(),
    });

    Self {
      current: ArcSwap::new(Arc::clone(&placeholder)),
      placeholder,
      sequence: AtomicU64::new(0),
    }
  }

  /// 最近一次发布的帧，尚未发布时为占位帧
  pub fn latest(&self) -> Arc<PublishedFrame> {
    self.current.load_full()
  }

  pub fn placeholder(&self) -> Arc<PublishedFrame> {
    Arc::clone(&self.placeholder)
  }

  /// 已发布的真实帧数
  pub fn published_count(&self) -> u64 {
    self.sequence.load(Ordering::Acquire)
  }

  /// 替换当前帧；空缓冲区被拒绝，返回是否发布成功
  pub fn publish(&self, bytes: Vec<u8>) -> bool {
    if bytes.is_empty() {
      warn!("拒绝发布空帧");
      return false;
    }

    let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
    self.current.store(Arc::new(PublishedFrame {
      sequence,
      bytes: bytes.into_boxed_slice(),
    }));
    true
  }
}
