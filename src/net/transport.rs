//! TCP 传输适配器
//!
//! 每条报文独占一条连接：发送方连接、写入 JSON 信封、关闭。
//! 接收方按接受顺序逐条读完连接后解码，依序放入入站车道；`Kill` 直接取消本 LP。
//! 单条连接的读取受 `lookahead_timeout_ms` 限制。

use super::id::PeerId;
use super::lanes::{Arrival, InboundSenders, Outgoing};
use super::message::Message;
use crate::config::{RetryPolicy, TopologySpec};
use crate::error::ProtocolError;
use crate::sim::LookAhead;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// 启动探测的轮询间隔
const PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// 入站侧：监听本分区地址
#[derive(Debug)]
pub struct TcpTransport {
    me: PeerId,
    topology: Arc<TopologySpec>,
    listener: TcpListener,
}

impl TcpTransport {
    /// 绑定拓扑中本分区的地址
    pub async fn bind(me: PeerId, topology: Arc<TopologySpec>) -> Result<Self, ProtocolError> {
        let addr = topology
            .partitions
            .get(me.0)
            .map(|p| p.address.clone())
            .ok_or(ProtocolError::UnknownSender(me))?;
        let listener = TcpListener::bind(addr.as_str())
            .await
            .map_err(|source| ProtocolError::Bind { addr: addr.clone(), source })?;
        info!(lp = %me, addr = %addr, "🔌 开始监听");
        Ok(Self::from_listener(me, topology, listener))
    }

    /// 使用已绑定的监听套接字（例如端口 0 上预先绑定的）
    pub fn from_listener(me: PeerId, topology: Arc<TopologySpec>, listener: TcpListener) -> Self {
        Self {
            me,
            topology,
            listener,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 接收并分流报文，直到收到 `Kill` 或 `kill` 被取消
    #[tracing::instrument(skip_all, fields(lp = %self.me))]
    pub async fn serve(self, lanes: InboundSenders, kill: CancellationToken) -> Result<(), ProtocolError> {
        let read_timeout = self.topology.settings.lookahead_timeout();
        loop {
            let (mut stream, peer_addr) = tokio::select! {
                _ = kill.cancelled() => break,
                accepted = self.listener.accept() => accepted?,
            };

            // 读不完的连接直接丢弃：发送方写入失败后会按重试策略重发
            let buf = tokio::select! {
                _ = kill.cancelled() => break,
                read = read_message(&mut stream, peer_addr, read_timeout) => match read {
                    Ok(buf) => buf,
                    Err(e) => {
                        warn!(from = %peer_addr, error = %e, "⚠️ 丢弃入站连接");
                        continue;
                    }
                },
            };

            let msg = Message::decode(&buf).map_err(|source| ProtocolError::Decode {
                addr: peer_addr.to_string(),
                source,
            })?;
            let Some(msg) = msg else {
                trace!(from = %peer_addr, "探测连接");
                continue;
            };

            let sender = msg.sender();
            if sender.0 >= self.topology.partitions.len() || sender == self.me {
                error!(from = %peer_addr, sender = %sender, "❌ 未知发送方");
                return Err(ProtocolError::UnknownSender(sender));
            }
            trace!(from = %sender, kind = ?msg.kind(), "收到报文");

            let delivered = match msg {
                Message::Event { sender, event } => lanes.deliver(Arrival::Event { from: sender, event }),
                Message::LookAheadRequest { sender, time } => {
                    lanes.deliver(Arrival::Request(LookAhead { peer: sender, time }))
                }
                Message::LookAhead { sender, time } => {
                    lanes.deliver(Arrival::Reply(LookAhead { peer: sender, time }))
                }
                Message::Kill { sender } => {
                    info!(from = %sender, "🛑 收到 Kill");
                    kill.cancel();
                    break;
                }
            };
            if !delivered {
                debug!(from = %sender, "核心已停止，丢弃入站报文");
            }
        }
        debug!("停止监听");
        Ok(())
    }
}

/// 读完一条连接；超过 `timeout` 仍未读到 EOF 即为 [`ProtocolError::ReadTimeout`]
pub(crate) async fn read_message(
    stream: &mut TcpStream,
    peer_addr: SocketAddr,
    timeout: Duration,
) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    match tokio::time::timeout(timeout, stream.read_to_end(&mut buf)).await {
        Ok(Ok(_)) => Ok(buf),
        Ok(Err(source)) => Err(ProtocolError::Receive(source)),
        Err(_) => Err(ProtocolError::ReadTimeout {
            addr: peer_addr.to_string(),
            waited_ms: timeout.as_millis() as u64,
        }),
    }
}

/// 建一条连接发送一条报文
pub async fn send_message(addr: &str, msg: &Message) -> io::Result<()> {
    let bytes = msg.encode().map_err(io::Error::other)?;
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await
}

/// 发送到 `peer`；连接失败按重试策略退避重发
async fn send_to(
    topology: &TopologySpec,
    peer: PeerId,
    msg: &Message,
    retry: RetryPolicy,
) -> Result<(), ProtocolError> {
    let addr = &topology
        .partitions
        .get(peer.0)
        .ok_or(ProtocolError::UnknownSender(peer))?
        .address;
    let mut attempt = 0;
    loop {
        match send_message(addr, msg).await {
            Ok(()) => return Ok(()),
            Err(source) if attempt + 1 >= retry.max_attempts.max(1) => {
                return Err(ProtocolError::Send {
                    peer,
                    addr: addr.clone(),
                    source,
                });
            }
            Err(e) => {
                trace!(peer = %peer, attempt, error = %e, "发送失败，退避重试");
                tokio::time::sleep(retry.backoff(attempt)).await;
                attempt += 1;
            }
        }
    }
}

/// 出站侧：清空核心的 [`Outgoing`] 通道直到它关闭
#[tracing::instrument(skip_all, fields(lp = %me))]
pub async fn drain(
    me: PeerId,
    topology: Arc<TopologySpec>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    shutdown: CancellationToken,
) -> Result<(), ProtocolError> {
    let retry = topology.settings.retry;
    let mut sent: u64 = 0;
    while let Some(out) = outgoing.recv().await {
        let (peer, msg) = match out {
            Outgoing::Event(event) => {
                let owner = topology
                    .owner_of(event.transition)
                    .ok_or(ProtocolError::Unroutable(event.transition))?;
                debug!(to = %owner, transition = %event.transition, time = %event.time, "📤 发送边界事件");
                (owner, Message::Event { sender: me, event })
            }
            Outgoing::Request { to, time } => (to, Message::LookAheadRequest { sender: me, time }),
            Outgoing::Reply { to, time } => (to, Message::LookAhead { sender: me, time }),
            Outgoing::Kill => {
                broadcast_kill(me, &topology).await;
                continue;
            }
        };
        match send_to(&topology, peer, &msg, retry).await {
            Ok(()) => sent += 1,
            Err(e) if shutdown.is_cancelled() => {
                debug!(error = %e, "正在关闭，忽略发送失败");
            }
            Err(e) => {
                error!(error = %e, "❌ 出站发送失败");
                return Err(e);
            }
        }
    }
    debug!(sent, "出站通道已关闭");
    Ok(())
}

/// 尽力通知其他所有分区结束；对方已退出只记录日志
pub async fn broadcast_kill(me: PeerId, topology: &TopologySpec) {
    for peer in topology.others(me) {
        let addr = &topology.partitions[peer.0].address;
        match send_message(addr, &Message::Kill { sender: me }).await {
            Ok(()) => debug!(to = %peer, "📤 发送 Kill"),
            Err(e) => debug!(to = %peer, error = %e, "Kill 未送达，对方可能已退出"),
        }
    }
}

/// 探测其他所有分区直到可达；超过 `timeout` 即报错
pub async fn wait_for_peers(
    me: PeerId,
    topology: &TopologySpec,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let started = Instant::now();
    for peer in topology.others(me) {
        let addr = &topology.partitions[peer.0].address;
        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    drop(stream);
                    debug!(peer = %peer, addr = %addr, "邻居可达");
                    break;
                }
                Err(e) if started.elapsed() >= timeout => {
                    warn!(peer = %peer, addr = %addr, error = %e, "⚠️ 邻居不可达");
                    return Err(ProtocolError::PeerUnreachable {
                        peer,
                        addr: addr.clone(),
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(_) => tokio::time::sleep(PROBE_INTERVAL).await,
            }
        }
    }
    info!(lp = %me, peers = topology.partitions.len().saturating_sub(1), "✅ 所有分区已就绪");
    Ok(())
}
