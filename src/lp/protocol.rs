//! Lookahead 协议
//!
//! 单一协调任务拥有在途请求表，并串行完成所有 lookahead 表的修改：
//!
//! - 应答邻居的请求：空闲时 `clock + idle_lookahead`，否则 `clock + 1`；
//! - 发出请求：同一邻居最多一个在途请求，重复的刷新合并到同一个请求上；
//! - 合并应答：单调 max 合并；没有把下界抬过当前时钟的应答按指数退避有界重发；
//! - 机会推进：表被抬高后尝试推进时钟，并刷新已落后于时钟的其他邻居。

use super::process::Shared;
use super::state::LpState;
use crate::config::{RetryPolicy, RunSettings};
use crate::error::SyncError;
use crate::net::{Outgoing, PeerId};
use crate::sim::{Clock, LookAhead, MergeOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

type Waiter = oneshot::Sender<Result<Clock, SyncError>>;

#[derive(Debug)]
enum Command {
    Refresh { peer: PeerId, done: Option<Waiter> },
    /// 退避结束，重发第 `attempt` 次请求
    Resend { peer: PeerId, attempt: u32 },
    /// 第 `attempt` 次请求的应答期限已到
    Deadline { peer: PeerId, attempt: u32 },
}

/// 主循环持有的请求句柄
#[derive(Debug, Clone)]
pub struct LookaheadClient {
    tx: mpsc::UnboundedSender<Command>,
}

impl LookaheadClient {
    /// 发起对 `peer` 的刷新，返回等待应答的接收端
    pub fn begin(
        &self,
        peer: PeerId,
    ) -> Result<oneshot::Receiver<Result<Clock, SyncError>>, SyncError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Command::Refresh {
                peer,
                done: Some(done),
            })
            .map_err(|_| SyncError::CoordinatorGone)?;
        Ok(rx)
    }

    /// 刷新 `peer` 并等待合并后的下界
    pub async fn refresh(&self, peer: PeerId) -> Result<Clock, SyncError> {
        self.begin(peer)?
            .await
            .map_err(|_| SyncError::CoordinatorGone)?
    }
}

/// 一个邻居的在途请求
#[derive(Debug)]
struct InFlight {
    attempt: u32,
    /// 当前这次尝试是否仍在等待应答（退避期间为 false）
    awaiting: bool,
    waiters: Vec<Waiter>,
}

/// 重试的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryCause {
    /// 应答早于当前时钟
    Stale,
    Timeout,
}

pub(crate) struct LookaheadCoordinator {
    shared: Arc<Shared>,
    id: PeerId,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands: mpsc::UnboundedReceiver<Command>,
    requests: mpsc::UnboundedReceiver<LookAhead>,
    replies: mpsc::UnboundedReceiver<LookAhead>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    inflight: HashMap<PeerId, InFlight>,
    retry: RetryPolicy,
    reply_timeout: Duration,
}

impl LookaheadCoordinator {
    pub(crate) fn new(
        shared: Arc<Shared>,
        requests: mpsc::UnboundedReceiver<LookAhead>,
        replies: mpsc::UnboundedReceiver<LookAhead>,
        outgoing: mpsc::UnboundedSender<Outgoing>,
        settings: &RunSettings,
    ) -> (LookaheadClient, Self) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let id = shared.state.lock().id();
        let client = LookaheadClient {
            tx: commands_tx.clone(),
        };
        let coordinator = Self {
            shared,
            id,
            commands_tx,
            commands,
            requests,
            replies,
            outgoing,
            inflight: HashMap::new(),
            retry: settings.retry,
            reply_timeout: settings.lookahead_timeout(),
        };
        (client, coordinator)
    }

    #[tracing::instrument(skip_all, fields(lp = %self.id))]
    pub(crate) async fn run(mut self, stop: CancellationToken) {
        debug!("lookahead 协调任务启动");
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                Some(cmd) = self.commands.recv() => self.on_command(cmd),
                Some(req) = self.requests.recv() => self.on_request(req),
                Some(rep) = self.replies.recv() => self.on_reply(rep),
                else => break,
            }
        }
        debug!(inflight = self.inflight.len(), "lookahead 协调任务退出");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Refresh { peer, done } => self.start_refresh(peer, done),
            Command::Resend { peer, attempt } => {
                let Some(f) = self.inflight.get_mut(&peer) else {
                    return;
                };
                if f.attempt == attempt && !f.awaiting {
                    f.awaiting = true;
                    self.send_request(peer, attempt);
                }
            }
            Command::Deadline { peer, attempt } => {
                let expired = self
                    .inflight
                    .get(&peer)
                    .is_some_and(|f| f.attempt == attempt && f.awaiting);
                if expired {
                    debug!(peer = %peer, attempt, "⏰ lookahead 应答超时");
                    self.retry_or_give_up(peer, RetryCause::Timeout);
                }
            }
        }
    }

    /// 发起刷新；已有在途请求时只登记等待者
    fn start_refresh(&mut self, peer: PeerId, done: Option<Waiter>) {
        if let Some(f) = self.inflight.get_mut(&peer) {
            trace!(peer = %peer, "已有在途请求，合并");
            f.waiters.extend(done);
            return;
        }
        self.inflight.insert(
            peer,
            InFlight {
                attempt: 0,
                awaiting: true,
                waiters: done.into_iter().collect(),
            },
        );
        self.send_request(peer, 0);
    }

    fn send_request(&self, peer: PeerId, attempt: u32) {
        let advertised = self.shared.state.lock().lookahead_reply();
        self.dispatch_request(peer, attempt, advertised);
    }

    /// 发出请求并启动本次尝试的应答期限；`advertised` 是本 LP 的最坏发射时间
    fn dispatch_request(&self, peer: PeerId, attempt: u32, advertised: Clock) {
        debug!(peer = %peer, attempt, advertised = %advertised, "📤 请求 lookahead");
        let request = Outgoing::Request {
            to: peer,
            time: advertised,
        };
        if self.outgoing.send(request).is_err() {
            warn!(peer = %peer, "传输层已关闭，无法发送 lookahead 请求");
        }
        let tx = self.commands_tx.clone();
        let limit = self.reply_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            let _ = tx.send(Command::Deadline { peer, attempt });
        });
    }

    /// 应答邻居的请求；请求方若是本 LP 的祖先，顺带合并它通告的时间
    fn on_request(&mut self, req: LookAhead) {
        let shared = self.shared.clone();
        let reply = {
            let mut st = shared.state.lock();
            if st.lookaheads().contains(req.peer) {
                let outcome = st.merge_lookahead(req.peer, req.time);
                self.after_merge(&mut st, req.peer, outcome);
            }
            st.lookahead_reply()
        };
        info!(peer = %req.peer, time = %reply, "📨 应答 lookahead");
        if self.outgoing.send(Outgoing::Reply { to: req.peer, time: reply }).is_err() {
            warn!(peer = %req.peer, "传输层已关闭，无法应答 lookahead");
        }
    }

    fn on_reply(&mut self, rep: LookAhead) {
        let shared = self.shared.clone();
        // 只有把下界抬过当前时钟的应答才算进展；否则与过期应答一样退避重发
        let bound = {
            let mut st = shared.state.lock();
            let clock = st.clock();
            if rep.time < clock {
                debug!(peer = %rep.peer, time = %rep.time, clock = %clock, "应答未覆盖当前时钟");
                None
            } else {
                let outcome = st.merge_lookahead(rep.peer, rep.time);
                self.after_merge(&mut st, rep.peer, outcome);
                let bound = st.lookaheads().get(rep.peer).unwrap_or(rep.time);
                if bound > clock {
                    Some(bound)
                } else {
                    debug!(peer = %rep.peer, bound = %bound, clock = %clock, "应答未推进下界");
                    None
                }
            }
        };

        match bound {
            Some(bound) => {
                if let Some(f) = self.inflight.remove(&rep.peer) {
                    debug!(peer = %rep.peer, bound = %bound, attempts = f.attempt + 1, "📬 lookahead 已更新");
                    resolve(f.waiters, Ok(bound));
                }
            }
            None => {
                let awaiting = self.inflight.get(&rep.peer).is_some_and(|f| f.awaiting);
                if awaiting {
                    self.retry_or_give_up(rep.peer, RetryCause::Stale);
                }
            }
        }
    }

    /// 有界重试：退避后重发；用尽后过期应答保留旧下界，超时则报告错误
    fn retry_or_give_up(&mut self, peer: PeerId, cause: RetryCause) {
        let Some(f) = self.inflight.get_mut(&peer) else {
            return;
        };
        let attempts = f.attempt + 1;
        if attempts >= self.retry.max_attempts {
            let Some(f) = self.inflight.remove(&peer) else {
                return;
            };
            let outcome = match cause {
                RetryCause::Stale => {
                    let kept = self
                        .shared
                        .state
                        .lock()
                        .lookaheads()
                        .get(peer)
                        .unwrap_or(Clock::ZERO);
                    warn!(peer = %peer, attempts, kept = %kept, "⚠️ lookahead 重试用尽，保留原下界");
                    Ok(kept)
                }
                RetryCause::Timeout => {
                    warn!(peer = %peer, attempts, "⚠️ 邻居无应答");
                    Err(SyncError::PeerTimeout { peer, attempts })
                }
            };
            resolve(f.waiters, outcome);
            return;
        }

        f.attempt = attempts;
        f.awaiting = false;
        let delay = self.retry.backoff(attempts);
        debug!(peer = %peer, attempt = attempts, ?cause, delay_ms = delay.as_millis() as u64, "🔁 退避后重发");
        let tx = self.commands_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Command::Resend {
                peer,
                attempt: attempts,
            });
        });
    }

    /// 表被抬高后：机会推进时钟，并刷新已落后于时钟的其他邻居（每个至多一个在途请求）
    fn after_merge(&mut self, st: &mut LpState, updated: PeerId, outcome: MergeOutcome) {
        if !matches!(outcome, MergeOutcome::Raised { .. }) {
            return;
        }
        if st.opportunistic_advance().is_some() {
            self.shared.wake_if_waiting(st);
        }
        let clock = st.clock();
        let lagging: Vec<PeerId> = st
            .lookaheads()
            .stale_peers(clock)
            .into_iter()
            .filter(|&p| p != updated && !self.inflight.contains_key(&p))
            .collect();
        for peer in lagging {
            debug!(peer = %peer, clock = %clock, "机会刷新落后邻居");
            self.inflight.insert(
                peer,
                InFlight {
                    attempt: 0,
                    awaiting: true,
                    waiters: Vec::new(),
                },
            );
            self.dispatch_request(peer, 0, st.lookahead_reply());
        }
    }
}

fn resolve(waiters: Vec<Waiter>, outcome: Result<Clock, SyncError>) {
    for w in waiters {
        let _ = w.send(outcome.clone());
    }
}
