//! 事件表
//!
//! 按时间升序排列的待处理事件多重集合；同一时间内按插入顺序（FIFO）出队。
//! 本结构不做并发控制，由本地仿真核心负责串行化访问。

use super::event::Event;
use super::time::Clock;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// 排队中的事件，包含插入序列号以保证同时刻稳定出队。
#[derive(Debug)]
struct Queued {
    seq: u64,
    event: Event,
}

// BinaryHeap 是 max-heap；我们需要最小时间优先，因此反向比较。
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.event.time.cmp(&other.event.time) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            ord => ord,
        }
        .reverse()
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.event.time == other.event.time && self.seq == other.seq
    }
}

impl Eq for Queued {}

/// 事件表
#[derive(Debug, Default)]
pub struct EventList {
    next_seq: u64,
    q: BinaryHeap<Queued>,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, event: Event) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.q.push(Queued { seq, event });
    }

    /// 最早事件的时间；空表返回 `Clock::INFINITY`
    pub fn earliest_time(&self) -> Clock {
        self.q.peek().map_or(Clock::INFINITY, |top| top.event.time)
    }

    /// 是否存在时间不晚于 `clock` 的事件。
    ///
    /// 迟到事件（时间早于当前时钟）也视为到期，否则它会永远堵在表头。
    pub fn has_due(&self, clock: Clock) -> bool {
        self.earliest_time() <= clock
    }

    pub fn pop_earliest(&mut self) -> Option<Event> {
        self.q.pop().map(|item| item.event)
    }

    /// 弹出一个到期事件
    pub fn pop_due(&mut self, clock: Clock) -> Option<Event> {
        if self.has_due(clock) {
            self.pop_earliest()
        } else {
            None
        }
    }

    /// 最早的外发（负 id）事件时间
    pub fn earliest_remote_time(&self) -> Clock {
        self.q
            .iter()
            .filter(|item| item.event.transition.is_remote())
            .map(|item| item.event.time)
            .min()
            .unwrap_or(Clock::INFINITY)
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }
}
