// 该文件是 DroneGuard （无人机哨兵） 项目的一部分。
// tests/publisher_test.rs - 最新帧并发读写测试
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

use std::{
  sync::{
    Arc, Barrier,
    atomic::{AtomicBool, Ordering},
  },
  thread,
};

use droneguard::publisher::FramePublisher;

const WRITES: u64 = 2000;
const READERS: usize = 8;

/// 第 n 帧：长度随 n 变化，每个字节都等于 n 的低 8 位
fn payload(n: u64) -> Vec<u8> {
  vec![(n & 0xFF) as u8; 16 + (n % 97) as usize]
}

#[test]
fn concurrent_readers_never_see_torn_frames() {
  let publisher = Arc::new(FramePublisher::with_placeholder(vec![0xAB; 32]));
  let done = Arc::new(AtomicBool::new(false));
  let barrier = Arc::new(Barrier::new(READERS + 1));

  let readers: Vec<_> = (0..READERS)
    .map(|_| {
      let publisher = Arc::clone(&publisher);
      let done = Arc::clone(&done);
      let barrier = Arc::clone(&barrier);
      thread::spawn(move || {
        barrier.wait();
        let mut reads = 0u64;
        let mut last_sequence = 0;
        loop {
          let finished = done.load(Ordering::Acquire);
          let frame = publisher.latest();
          assert!(!frame.is_empty());

          if frame.is_placeholder() {
            assert!(frame.bytes.iter().all(|b| *b == 0xAB));
          } else {
            let expected = payload(frame.sequence);
            assert_eq!(&*frame.bytes, expected.as_slice());
          }
          // 单写者：读者看到的序号不会倒退
          assert!(frame.sequence >= last_sequence);
          last_sequence = frame.sequence;
          reads += 1;
          if finished {
            break;
          }
        }
        reads
      })
    })
    .collect();

  barrier.wait();
  for n in 1..=WRITES {
    assert!(publisher.publish(payload(n)));
  }
  done.store(true, Ordering::Release);

  for reader in readers {
    assert!(reader.join().unwrap() > 0);
  }

  let latest = publisher.latest();
  assert_eq!(latest.sequence, WRITES);
  assert_eq!(&*latest.bytes, payload(WRITES).as_slice());
}

#[test]
fn reference_outlives_later_swaps() {
  let publisher = FramePublisher::with_placeholder(vec![1]);
  publisher.publish(payload(1));
  let held = publisher.latest();

  for n in 2..100 {
    publisher.publish(payload(n));
  }

  assert_eq!(held.sequence, 1);
  assert_eq!(&*held.bytes, payload(1).as_slice());
  assert_eq!(publisher.latest().sequence, 99);
}
