use crate::config::{PartitionSpec, RunSettings, TopologySpec};
use crate::error::LpResult;
use crate::lp::{LogicalProcess, LpState, RunReport};
use crate::net::{PeerId, TcpTransport, drain, inbound_lanes, wait_for_peers};
use crate::petri::{LefEvaluator, Subnet, Transition};
use crate::sim::{Clock, LookaheadTable, TransitionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

fn partition(address: String, owns: i64, ancestors: Vec<PeerId>, successors: Vec<PeerId>) -> PartitionSpec {
    PartitionSpec {
        address,
        transitions: vec![TransitionId(owns)],
        ancestors,
        successors,
        idle_lookahead: Some(1),
        initial_lookahead: Clock::ZERO,
        subnet: None,
    }
}

fn process(me: PeerId, topology: &TopologySpec, transitions: Vec<Transition>) -> LogicalProcess {
    let part = &topology.partitions[me.0];
    let state = LpState::new(
        me,
        Subnet::new(transitions).expect("valid subnet"),
        Box::new(LefEvaluator),
        LookaheadTable::new(part.ancestors.iter().copied(), part.initial_lookahead),
        1,
    );
    LogicalProcess::new(state, topology.settings.clone())
}

/// 与二进制相同的接线：监听、探测、出站清空、运行
async fn run_partition(
    lp: LogicalProcess,
    me: PeerId,
    topology: Arc<TopologySpec>,
    listener: TcpListener,
    end: Clock,
) -> LpResult<RunReport> {
    let kill = lp.shutdown_token();
    let transport = TcpTransport::from_listener(me, topology.clone(), listener);
    let (lanes, inbound) = inbound_lanes();
    let server = tokio::spawn(transport.serve(lanes, kill.clone()));
    wait_for_peers(me, &topology, Duration::from_secs(5)).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let sender = tokio::spawn(drain(me, topology.clone(), rx, kill.clone()));
    let report = lp.run(Clock::ZERO, end, inbound, tx).await;
    sender.await??;
    kill.cancel();
    server.await??;
    report
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn boundary_event_crosses_partitions_over_tcp() {
    let l0 = TcpListener::bind("127.0.0.1:0").await.expect("bind LP0");
    let l1 = TcpListener::bind("127.0.0.1:0").await.expect("bind LP1");
    let topology = Arc::new(TopologySpec {
        partitions: vec![
            partition(
                l0.local_addr().expect("addr").to_string(),
                0,
                vec![PeerId(1)],
                vec![PeerId(1)],
            ),
            partition(
                l1.local_addr().expect("addr").to_string(),
                1,
                vec![PeerId(0)],
                vec![PeerId(0)],
            ),
        ],
        settings: RunSettings {
            idle_timeout_ms: None,
            lookahead_timeout_ms: 1_000,
            ..RunSettings::default()
        },
    });

    // LP0：T0 在 0 触发一次，t=1 时给 LP1 的 T1 送去 -1
    let lp0 = process(
        PeerId(0),
        &topology,
        vec![
            Transition::new(0, 1)
                .with_delayed(-2, -1)
                .as_boundary(vec![]),
        ],
    );
    // LP1：T1 被敏化后每个 tick 触发一次
    let lp1 = process(
        PeerId(1),
        &topology,
        vec![
            Transition::new(1, 1)
                .with_value(1)
                .with_delayed(1, 0)
                .as_boundary(vec![]),
        ],
    );
    let kill0 = lp0.shutdown_token();

    let h0 = tokio::spawn(run_partition(lp0, PeerId(0), topology.clone(), l0, Clock(1_000)));
    let h1 = tokio::spawn(run_partition(lp1, PeerId(1), topology.clone(), l1, Clock(5)));

    let r1 = tokio::time::timeout(Duration::from_secs(20), h1)
        .await
        .expect("LP1 finishes")
        .expect("join LP1")
        .expect("LP1 run");
    kill0.cancel();
    let r0 = tokio::time::timeout(Duration::from_secs(20), h0)
        .await
        .expect("LP0 stops")
        .expect("join LP0")
        .expect("LP0 run");

    assert_eq!(r0.firings.pairs(), vec![(0, 0)]);
    assert!(r0.killed);
    assert!(!r1.killed);
    assert_eq!(r1.final_clock, Clock(5));
    assert_eq!(r1.firings.pairs(), vec![(1, 1), (1, 2), (1, 3), (1, 4)]);
}
