//! 错误类型
//!
//! 按致命程度划分：配置错误、模型一致性错误、协议/传输错误、同步错误。
//! 所有致命错误都向上传播到进程边界，由 `main` 统一终止进程。

use crate::net::PeerId;
use crate::sim::{Clock, TransitionId};
use std::path::PathBuf;
use thiserror::Error;

/// 子网或拓扑文件缺失/格式错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("partition {index} out of range (topology has {count})")]
    PartitionOutOfRange { index: usize, count: usize },

    #[error("{of} references unknown partition {peer}")]
    UnknownPartition { of: PeerId, peer: PeerId },

    #[error("{of} lists itself as a neighbor")]
    SelfNeighbor { of: PeerId },

    #[error("{transition} is owned by both {first} and {second}")]
    SharedTransition {
        transition: TransitionId,
        first: PeerId,
        second: PeerId,
    },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// 加载的网内部不一致
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("subnet has no boundary transition")]
    MissingBoundary,

    #[error("subnet has more than one boundary transition ({first}, {second})")]
    MultipleBoundary {
        first: TransitionId,
        second: TransitionId,
    },

    #[error("duplicate transition id {0}")]
    DuplicateTransition(TransitionId),

    #[error("transition {id} has duration {duration}, must be at least 1")]
    InvalidDuration { id: TransitionId, duration: i64 },

    #[error("{from} propagates to unresolved transition {target}")]
    UnresolvedTarget {
        from: TransitionId,
        target: TransitionId,
    },

    #[error("event addresses unknown local transition {0}")]
    UnknownTransition(TransitionId),
}

/// 报文解码或传输失败
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message from {addr}: {source}")]
    Decode {
        addr: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("message from unknown sender {0}")]
    UnknownSender(PeerId),

    #[error("no partition owns transition {0}")]
    Unroutable(TransitionId),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send to {peer} at {addr}: {source}")]
    Send {
        peer: PeerId,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to receive: {0}")]
    Receive(#[from] std::io::Error),

    #[error("connection from {addr} not finished after {waited_ms} ms")]
    ReadTimeout { addr: String, waited_ms: u64 },

    #[error("{peer} at {addr} unreachable after {waited_ms} ms")]
    PeerUnreachable {
        peer: PeerId,
        addr: String,
        waited_ms: u64,
    },
}

/// 同步等待未能完成
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("{peer} did not answer a lookahead request after {attempts} attempts")]
    PeerTimeout { peer: PeerId, attempts: u32 },

    #[error("idle at clock {clock} for {waited_ms} ms without new events")]
    IdleTimeout { clock: Clock, waited_ms: u64 },

    #[error("lookahead coordinator stopped")]
    CoordinatorGone,
}

/// 逻辑进程的顶层错误
#[derive(Debug, Error)]
pub enum LpError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("synchronization error: {0}")]
    Sync(#[from] SyncError),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type LpResult<T> = Result<T, LpError>;
