//! 子网
//!
//! 一个 LP 拥有的变迁集合。仿真开始前加载一次，之后只由本地仿真核心修改。

use super::transition::Transition;
use crate::error::{ConfigError, ModelError};
use crate::sim::TransitionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// 子网描述文件的顶层结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub transitions: Vec<Transition>,
}

#[derive(Debug, Clone)]
pub struct Subnet {
    transitions: Vec<Transition>,
    index: HashMap<TransitionId, usize>,
    boundary: usize,
}

impl Subnet {
    /// 建立子网并校验内部一致性
    pub fn new(transitions: Vec<Transition>) -> Result<Self, ModelError> {
        let mut index = HashMap::with_capacity(transitions.len());
        for (i, t) in transitions.iter().enumerate() {
            if index.insert(t.id, i).is_some() {
                return Err(ModelError::DuplicateTransition(t.id));
            }
            // 延迟传播至少落在下一时刻，`clock + 1` 的 lookahead 承诺依赖于此
            if t.duration < 1 {
                return Err(ModelError::InvalidDuration {
                    id: t.id,
                    duration: t.duration,
                });
            }
        }

        let mut boundary: Option<usize> = None;
        for (i, t) in transitions.iter().enumerate().filter(|(_, t)| t.boundary) {
            if let Some(first) = boundary {
                return Err(ModelError::MultipleBoundary {
                    first: transitions[first].id,
                    second: t.id,
                });
            }
            boundary = Some(i);
        }
        let boundary = boundary.ok_or(ModelError::MissingBoundary)?;

        for t in &transitions {
            // 零延迟传播只能作用于本地变迁；延迟传播的负 id 由拓扑负责解析
            let local_targets = t
                .immediate
                .iter()
                .map(|p| p.target())
                .chain(t.delayed.iter().map(|p| p.target()).filter(|id| !id.is_remote()));
            for target in local_targets {
                if !index.contains_key(&target) {
                    return Err(ModelError::UnresolvedTarget { from: t.id, target });
                }
            }
        }

        Ok(Self {
            transitions,
            index,
            boundary,
        })
    }

    /// 从 JSON 文件加载
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!(path = %path.display(), "📂 加载子网");
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let spec: SubnetSpec = serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let subnet = Self::new(spec.transitions)?;
        debug!(transitions = subnet.len(), boundary = %subnet.boundary().id, "子网已加载");
        Ok(subnet)
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn find_index(&self, id: TransitionId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn get(&self, idx: usize) -> &Transition {
        &self.transitions[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Transition {
        &mut self.transitions[idx]
    }

    pub fn by_id(&self, id: TransitionId) -> Option<&Transition> {
        self.find_index(id).map(|i| &self.transitions[i])
    }

    /// 按 id 找到本地变迁并返回可变引用；找不到即模型错误
    pub fn resolve_mut(&mut self, id: TransitionId) -> Result<&mut Transition, ModelError> {
        let idx = self
            .find_index(id)
            .ok_or(ModelError::UnknownTransition(id))?;
        Ok(&mut self.transitions[idx])
    }

    pub fn boundary(&self) -> &Transition {
        &self.transitions[self.boundary]
    }

    /// 从边界变迁的穿越时间向量推出空闲 lookahead（取最小值）
    pub fn idle_lookahead_hint(&self) -> Option<i64> {
        self.boundary().traversal_times.iter().copied().min()
    }

    /// 所有外发目标（已解码的全局 id）
    pub fn remote_targets(&self) -> impl Iterator<Item = (TransitionId, TransitionId)> + '_ {
        self.transitions.iter().flat_map(|t| {
            t.delayed
                .iter()
                .filter_map(move |p| p.target().decode_remote().map(|g| (t.id, g)))
        })
    }
}
