use crate::config::RunSettings;
use crate::error::{LpError, SyncError};
use crate::lp::{LogicalProcess, LpState};
use crate::net::{Arrival, Outgoing, PeerId, inbound_lanes};
use crate::petri::{Evaluator, LefEvaluator, Subnet, Transition};
use crate::sim::{Clock, Event, LookAhead, LookaheadTable, TransitionId};
use std::time::Duration;
use tokio::sync::mpsc;

fn state(transitions: Vec<Transition>, ancestors: &[PeerId], idle_lookahead: i64) -> LpState {
    let subnet = Subnet::new(transitions).expect("valid subnet");
    LpState::new(
        PeerId(0),
        subnet,
        Box::new(LefEvaluator),
        LookaheadTable::new(ancestors.iter().copied(), Clock::ZERO),
        idle_lookahead,
    )
}

/// T0 每个 tick 把自身的累加值加一：-2 → -1 → 0 → 1
fn self_loop() -> Vec<Transition> {
    vec![
        Transition::new(0, 1)
            .with_value(-2)
            .with_delayed(0, 1)
            .as_boundary(vec![]),
    ]
}

async fn run_alone(
    lp: &LogicalProcess,
    start: i64,
    end: i64,
) -> (crate::lp::RunReport, Vec<Outgoing>) {
    let (_lanes, inbound) = inbound_lanes();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = lp
        .run(Clock(start), Clock(end), inbound, tx)
        .await
        .expect("run");
    let mut sent = Vec::new();
    while let Ok(out) = rx.try_recv() {
        sent.push(out);
    }
    (report, sent)
}

#[tokio::test]
async fn self_loop_fires_once_per_tick() {
    let lp = LogicalProcess::new(state(self_loop(), &[], 1), RunSettings::default());
    let (report, sent) = run_alone(&lp, 0, 3).await;

    assert_eq!(report.firings.pairs(), vec![(0, 0), (0, 1), (0, 2)]);
    assert_eq!(report.final_clock, Clock(3));
    assert_eq!(report.throughput.events, 3);
    assert!(!report.killed);
    assert!(sent.is_empty());
}

#[tokio::test]
async fn lef_loop_keeps_firing_until_the_end() {
    // 触发瞬间 +1 禁用自身，完成时 -1 重新敏化
    let lp = LogicalProcess::new(
        state(
            vec![
                Transition::new(0, 2)
                    .with_immediate(0, 1)
                    .with_delayed(0, -1)
                    .as_boundary(vec![]),
            ],
            &[],
            1,
        ),
        RunSettings::default(),
    );
    let (report, _) = run_alone(&lp, 0, 7).await;
    assert_eq!(report.firings.pairs(), vec![(0, 0), (0, 2), (0, 4), (0, 6)]);
}

#[tokio::test]
async fn zero_cycle_run_leaves_everything_empty() {
    let lp = LogicalProcess::new(state(self_loop(), &[], 1), RunSettings::default());
    let (report, sent) = run_alone(&lp, 0, 0).await;

    assert!(report.firings.is_empty());
    assert_eq!(report.throughput.events, 0);
    assert!(sent.is_empty());
    assert!(lp.with_state(|st| st.events().is_empty()));
}

#[tokio::test]
async fn boundary_events_are_forwarded_not_applied() {
    let lp = LogicalProcess::new(
        state(
            vec![
                Transition::new(0, 2)
                    .with_delayed(-6, 1)
                    .as_boundary(vec![]),
            ],
            &[],
            1,
        ),
        RunSettings::default(),
    );
    let (report, sent) = run_alone(&lp, 0, 5).await;

    assert_eq!(report.firings.pairs(), vec![(0, 0)]);
    assert_eq!(
        sent,
        vec![Outgoing::Event(Event::new(Clock(2), TransitionId(5), 1))]
    );
    assert_eq!(report.throughput.events, 1);
    // 空闲且无上游时直接跳到周期末尾
    assert_eq!(report.final_clock, Clock(5));
    lp.with_state(|st| {
        let t0 = st.subnet().by_id(TransitionId(0)).expect("T0");
        assert_eq!(t0.value, 0);
        assert_eq!(t0.time, Clock::ZERO);
    });
}

#[tokio::test]
async fn firing_clocks_never_decrease() {
    let lp = LogicalProcess::new(
        state(
            vec![
                Transition::new(0, 1)
                    .with_value(-10)
                    .with_delayed(0, 1)
                    .with_delayed(1, -1)
                    .as_boundary(vec![]),
                Transition::new(1, 3).with_value(1).with_delayed(1, 1),
            ],
            &[],
            1,
        ),
        RunSettings::default(),
    );
    let (report, _) = run_alone(&lp, 0, 12).await;

    let clocks: Vec<i64> = report.firings.pairs().iter().map(|&(_, c)| c).collect();
    assert!(!clocks.is_empty());
    assert!(clocks.windows(2).all(|w| w[0] <= w[1]));
    assert!(report.firings.pairs().contains(&(1, 1)));
}

#[tokio::test]
async fn idle_process_with_ancestor_times_out() {
    let settings = RunSettings {
        idle_timeout_ms: Some(30),
        ..RunSettings::default()
    };
    let lp = LogicalProcess::new(
        state(
            vec![Transition::new(0, 1).with_value(1).as_boundary(vec![])],
            &[PeerId(1)],
            1,
        ),
        settings,
    );
    let (_lanes, inbound) = inbound_lanes();
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = lp
        .run(Clock::ZERO, Clock(10), inbound, tx)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LpError::Sync(SyncError::IdleTimeout { clock: Clock(0), .. })
    ));
}

#[tokio::test]
async fn kill_stops_an_idle_process() {
    let settings = RunSettings {
        idle_timeout_ms: None,
        ..RunSettings::default()
    };
    let lp = LogicalProcess::new(
        state(
            vec![Transition::new(0, 1).with_value(1).as_boundary(vec![])],
            &[PeerId(1)],
            1,
        ),
        settings,
    );
    let kill = lp.shutdown_token();
    let (_lanes, inbound) = inbound_lanes();
    let (tx, _rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move { lp.run(Clock::ZERO, Clock(10), inbound, tx).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    kill.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run ends after kill")
        .expect("join")
        .expect("run");
    assert!(report.killed);
    assert!(report.firings.is_empty());
}

#[tokio::test]
async fn inbound_event_wakes_an_idle_process() {
    let settings = RunSettings {
        idle_timeout_ms: Some(5_000),
        ..RunSettings::default()
    };
    // 上游以 +∞ 作为初值，不需要 lookahead 往返
    let subnet = Subnet::new(vec![Transition::new(0, 1).with_value(1).as_boundary(vec![])])
        .expect("valid subnet");
    let st = LpState::new(
        PeerId(0),
        subnet,
        Box::new(LefEvaluator),
        LookaheadTable::new([PeerId(1)], Clock::INFINITY),
        1,
    );
    let lp = LogicalProcess::new(st, settings);
    let kill = lp.shutdown_token();
    let (lanes, inbound) = inbound_lanes();
    let (tx, _rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move { lp.run(Clock::ZERO, Clock(10), inbound, tx).await });
    assert!(lanes.deliver(Arrival::Event {
        from: PeerId(1),
        event: Event::new(Clock(3), TransitionId(0), -1),
    }));

    // 事件在 3 敏化 T0；之后再次空闲，由 Kill 结束
    tokio::time::sleep(Duration::from_millis(100)).await;
    kill.cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run ends after kill")
        .expect("join")
        .expect("run");
    assert_eq!(report.firings.pairs(), vec![(0, 3)]);
    assert_eq!(report.throughput.events, 1);
}

/// 本地 T0 在 5 有待处理事件，T1 等待上游的 -1；上游下界初值为 0
fn waiting_on_ancestor(settings: RunSettings) -> LogicalProcess {
    let mut st = state(
        vec![
            Transition::new(0, 1).with_value(1).as_boundary(vec![]),
            Transition::new(1, 1).with_value(1),
        ],
        &[PeerId(1)],
        1,
    );
    st.insert_inbound(PeerId(1), Event::new(Clock(5), TransitionId(0), 1));
    LogicalProcess::new(st, settings)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn event_sent_before_reply_is_applied_before_the_clock_moves_past_it() {
    for _ in 0..25 {
        let lp = waiting_on_ancestor(RunSettings {
            idle_timeout_ms: Some(5_000),
            ..RunSettings::default()
        });
        let (lanes, inbound) = inbound_lanes();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move { lp.run(Clock::ZERO, Clock(5), inbound, tx).await });

        // 上游先发事件再应答，与发送侧在锁内排队的顺序一致
        loop {
            let out = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("lookahead request")
                .expect("outgoing open");
            if matches!(out, Outgoing::Request { to, .. } if to == PeerId(1)) {
                break;
            }
        }
        assert!(lanes.deliver(Arrival::Event {
            from: PeerId(1),
            event: Event::new(Clock(2), TransitionId(1), -1),
        }));
        assert!(lanes.deliver(Arrival::Reply(LookAhead {
            peer: PeerId(1),
            time: Clock(10),
        })));

        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run finishes")
            .expect("join")
            .expect("run");
        assert_eq!(report.firings.pairs(), vec![(1, 2)]);
        assert_eq!(report.final_clock, Clock(5));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stuck_ancestor_is_not_flooded_with_requests() {
    let lp = waiting_on_ancestor(RunSettings {
        idle_timeout_ms: Some(5_000),
        ..RunSettings::default()
    });
    let kill = lp.shutdown_token();
    let (lanes, inbound) = inbound_lanes();
    let (tx, mut rx) = mpsc::unbounded_channel();

    // 上游永远停在 1
    let ancestor = tokio::spawn(async move {
        let mut requests = 0usize;
        while let Some(out) = rx.recv().await {
            if let Outgoing::Request { to, .. } = out {
                requests += 1;
                lanes.deliver(Arrival::Reply(LookAhead {
                    peer: to,
                    time: Clock(1),
                }));
            }
        }
        requests
    });
    let handle = tokio::spawn(async move { lp.run(Clock::ZERO, Clock(10), inbound, tx).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    kill.cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run ends after kill")
        .expect("join")
        .expect("run");
    let requests = ancestor.await.expect("ancestor task");

    assert!(report.killed);
    assert_eq!(report.final_clock, Clock(1));
    assert!(report.firings.is_empty());
    assert!(requests >= 2, "requests={requests}");
    assert!(requests < 50, "requests={requests}");
}

#[test]
fn idle_lookahead_reply() {
    let mut st = state(
        vec![Transition::new(0, 1).with_value(1).as_boundary(vec![])],
        &[PeerId(1)],
        5,
    );
    st.advance_to(Clock(2));
    assert_eq!(st.lookahead_reply(), Clock(7));
}

#[test]
fn enabled_lookahead_reply() {
    let mut st = state(
        vec![Transition::new(0, 1).with_time(Clock(10)).as_boundary(vec![])],
        &[PeerId(1)],
        5,
    );
    st.advance_to(Clock(10));
    assert_eq!(st.lookahead_reply(), Clock(11));
}

#[test]
fn lookahead_reply_never_passes_pending_boundary_event() {
    let mut st = state(
        vec![
            Transition::new(0, 2)
                .with_delayed(-4, 1)
                .as_boundary(vec![]),
        ],
        &[],
        9,
    );
    st.refresh_enabled();
    st.fire_enabled().expect("fire");
    // 已排队 t=2 的外发事件，空闲承诺 0+9 被截到 2
    assert_eq!(st.lookahead_reply(), Clock(2));
}

#[test]
fn late_inbound_event_applies_at_current_clock() {
    let mut st = state(
        vec![Transition::new(0, 1).with_value(1).as_boundary(vec![])],
        &[PeerId(1)],
        1,
    );
    st.advance_to(Clock(5));
    st.insert_inbound(PeerId(1), Event::new(Clock(3), TransitionId(0), -1));

    let outbound = st.apply_due().expect("apply");
    assert!(outbound.is_empty());
    let t0 = st.subnet().by_id(TransitionId(0)).expect("T0");
    assert_eq!(t0.value, 0);
    assert_eq!(t0.time, Clock(5));
    assert!(LefEvaluator.is_enabled(st.subnet(), 0, Clock(5)));
}

#[test]
fn advance_clock_respects_lookahead_bound() {
    let mut st = state(
        vec![Transition::new(0, 1).with_value(1).as_boundary(vec![])],
        &[PeerId(1)],
        1,
    );
    st.insert_inbound(PeerId(1), Event::new(Clock(6), TransitionId(0), -1));
    st.merge_lookahead(PeerId(1), Clock(4));

    assert_eq!(st.advance_clock(), Some((Clock::ZERO, Clock(4))));
    assert!(st.apply_due().expect("apply").is_empty());
    assert_eq!(st.events().len(), 1);

    st.merge_lookahead(PeerId(1), Clock(20));
    assert_eq!(st.advance_clock(), Some((Clock(4), Clock(6))));
    assert_eq!(st.apply_due().expect("apply").len(), 0);
    assert!(st.events().is_empty());
}

#[test]
fn opportunistic_advance_stops_at_earliest_event() {
    let mut st = state(
        vec![Transition::new(0, 1).with_value(1).as_boundary(vec![])],
        &[PeerId(1)],
        1,
    );
    st.insert_inbound(PeerId(1), Event::new(Clock(3), TransitionId(0), 1));
    st.merge_lookahead(PeerId(1), Clock(10));
    assert_eq!(st.opportunistic_advance(), Some(Clock(3)));
    assert_eq!(st.clock(), Clock(3));
    assert_eq!(st.opportunistic_advance(), None);
}

#[test]
fn opportunistic_advance_waits_while_something_is_enabled() {
    let mut st = state(
        vec![Transition::new(0, 1).as_boundary(vec![])],
        &[PeerId(1)],
        1,
    );
    st.merge_lookahead(PeerId(1), Clock(10));
    assert_eq!(st.opportunistic_advance(), None);
    assert_eq!(st.clock(), Clock::ZERO);
}
