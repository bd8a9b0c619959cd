//! Lookahead 表
//!
//! 记录每个祖先 LP 的已知时间下界：`PeerId` 承诺不会再发出早于该时间的边界事件。

use super::time::Clock;
use crate::net::PeerId;
use std::collections::BTreeMap;

/// 邻居给出的承诺
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookAhead {
    pub peer: PeerId,
    pub time: Clock,
}

/// 合并结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// 下界被抬高
    Raised { from: Clock, to: Clock },
    /// 不晚于现有值，丢弃
    Stale { current: Clock },
    /// 不是本 LP 的祖先
    UnknownPeer,
}

/// PeerId -> 最近已知的 lookahead 时间
#[derive(Debug, Clone, Default)]
pub struct LookaheadTable {
    bounds: BTreeMap<PeerId, Clock>,
}

impl LookaheadTable {
    /// 每个祖先以同一初始值建表（0 或配置的最小穿越估计）
    pub fn new(peers: impl IntoIterator<Item = PeerId>, initial: Clock) -> Self {
        Self {
            bounds: peers.into_iter().map(|p| (p, initial)).collect(),
        }
    }

    pub fn get(&self, peer: PeerId) -> Option<Clock> {
        self.bounds.get(&peer).copied()
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.bounds.contains_key(&peer)
    }

    /// 单调 max 合并：只接受比当前值更晚的时间
    pub fn merge(&mut self, peer: PeerId, time: Clock) -> MergeOutcome {
        let Some(current) = self.bounds.get_mut(&peer) else {
            return MergeOutcome::UnknownPeer;
        };
        if time > *current {
            let from = *current;
            *current = time;
            MergeOutcome::Raised { from, to: time }
        } else {
            MergeOutcome::Stale { current: *current }
        }
    }

    /// 所有下界的最小值；没有祖先时为 `Clock::INFINITY`
    pub fn min_bound(&self) -> Clock {
        self.bounds.values().copied().min().unwrap_or(Clock::INFINITY)
    }

    /// 下界不晚于 `limit` 的邻居
    pub fn stale_peers(&self, limit: Clock) -> Vec<PeerId> {
        self.bounds
            .iter()
            .filter(|&(_, &t)| t <= limit)
            .map(|(&p, _)| p)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }
}
