//! 拓扑与运行配置
//!
//! `<prefix>.topology.json` 描述所有分区（地址、拥有的变迁、祖先/后继、空闲 lookahead）
//! 以及运行参数；分区 `i` 的子网默认位于 `<prefix>.subnet<i>.json`。

use crate::error::{ConfigError, ModelError};
use crate::net::PeerId;
use crate::petri::Subnet;
use crate::sim::{Clock, TransitionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySpec {
    pub partitions: Vec<PartitionSpec>,
    #[serde(default)]
    pub settings: RunSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// `host:port`
    pub address: String,
    /// 本分区拥有的全局变迁 id
    pub transitions: Vec<TransitionId>,
    /// 会向本分区发送边界事件的分区
    #[serde(default)]
    pub ancestors: Vec<PeerId>,
    #[serde(default)]
    pub successors: Vec<PeerId>,
    /// token 从入口穿越到边界所需的最少 tick
    #[serde(default)]
    pub idle_lookahead: Option<i64>,
    /// lookahead 表初值
    #[serde(default)]
    pub initial_lookahead: Clock,
    /// 子网文件（相对拓扑文件所在目录）
    #[serde(default)]
    pub subnet: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// 仿真到该时钟为止
    pub cycles: i64,
    pub startup_timeout_ms: u64,
    /// 单次 lookahead 请求等待应答的上限
    pub lookahead_timeout_ms: u64,
    /// 空闲等待新事件的上限；`None` 表示无限等待
    pub idle_timeout_ms: Option<u64>,
    pub retry: RetryPolicy,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            cycles: 100,
            startup_timeout_ms: 5_000,
            lookahead_timeout_ms: 2_000,
            idle_timeout_ms: Some(30_000),
            retry: RetryPolicy::default(),
        }
    }
}

impl RunSettings {
    pub fn lookahead_timeout(&self) -> Duration {
        Duration::from_millis(self.lookahead_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// lookahead 请求的有界重试（指数退避）
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_backoff_ms: 5,
            max_backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次重发前的等待：`base · 2^attempt`，封顶 `max_backoff_ms`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .base_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl TopologySpec {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let topo: TopologySpec = serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        topo.validate()?;
        Ok(topo)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let count = self.partitions.len();
        let mut owners: HashMap<TransitionId, PeerId> = HashMap::new();
        for (i, p) in self.partitions.iter().enumerate() {
            let me = PeerId(i);
            for &peer in p.ancestors.iter().chain(&p.successors) {
                if peer == me {
                    return Err(ConfigError::SelfNeighbor { of: me });
                }
                if peer.0 >= count {
                    return Err(ConfigError::UnknownPartition { of: me, peer });
                }
            }
            for &t in &p.transitions {
                if let Some(first) = owners.insert(t, me) {
                    return Err(ConfigError::SharedTransition {
                        transition: t,
                        first,
                        second: me,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn partition(&self, id: PeerId) -> Result<&PartitionSpec, ConfigError> {
        self.partitions
            .get(id.0)
            .ok_or(ConfigError::PartitionOutOfRange {
                index: id.0,
                count: self.partitions.len(),
            })
    }

    /// 拥有全局变迁 `global` 的分区
    pub fn owner_of(&self, global: TransitionId) -> Option<PeerId> {
        self.partitions
            .iter()
            .position(|p| p.transitions.contains(&global))
            .map(PeerId)
    }

    /// 除 `me` 以外的所有分区
    pub fn others(&self, me: PeerId) -> impl Iterator<Item = PeerId> + '_ {
        (0..self.partitions.len())
            .map(PeerId)
            .filter(move |&p| p != me)
    }
}

/// 一个分区的完整运行描述：拓扑 + 已加载的子网
#[derive(Debug, Clone)]
pub struct Deployment {
    pub me: PeerId,
    pub topology: TopologySpec,
    pub subnet: Subnet,
    pub idle_lookahead: i64,
}

impl Deployment {
    pub fn topology_path(prefix: &Path) -> PathBuf {
        with_suffix(prefix, ".topology.json")
    }

    pub fn subnet_path(prefix: &Path, index: usize) -> PathBuf {
        with_suffix(prefix, &format!(".subnet{index}.json"))
    }

    /// 按 `<prefix>` 加载拓扑与本分区子网，并交叉校验外发目标
    pub fn load(index: usize, prefix: &Path) -> Result<Self, ConfigError> {
        let topo_path = Self::topology_path(prefix);
        info!(path = %topo_path.display(), index, "📂 加载拓扑");
        let topology = TopologySpec::load(&topo_path)?;
        let me = PeerId(index);
        let part = topology.partition(me)?;

        let subnet_path = match &part.subnet {
            Some(rel) => topo_path
                .parent()
                .map_or_else(|| rel.clone(), |dir| dir.join(rel)),
            None => Self::subnet_path(prefix, index),
        };
        let subnet = Subnet::load(&subnet_path)?;

        for (from, global) in subnet.remote_targets() {
            if topology.owner_of(global).is_none() {
                return Err(ModelError::UnresolvedTarget {
                    from,
                    target: TransitionId::encode_remote(global),
                }
                .into());
            }
        }

        let idle_lookahead = resolve_idle_lookahead(part, &subnet);
        Ok(Self {
            me,
            topology,
            subnet,
            idle_lookahead,
        })
    }

    pub fn partition(&self) -> &PartitionSpec {
        &self.topology.partitions[self.me.0]
    }

    pub fn settings(&self) -> &RunSettings {
        &self.topology.settings
    }
}

/// 配置值优先；否则取边界变迁穿越时间的最小值；都没有时退回 1
pub fn resolve_idle_lookahead(part: &PartitionSpec, subnet: &Subnet) -> i64 {
    if let Some(v) = part.idle_lookahead {
        return v.max(1);
    }
    match subnet.idle_lookahead_hint() {
        Some(v) => v.max(1),
        None => {
            warn!("⚠️ 未配置空闲 lookahead，边界变迁也没有穿越时间，使用 1");
            1
        }
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}
