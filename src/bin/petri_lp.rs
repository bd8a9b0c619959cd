use clap::Parser;
use petri_lp::config::Deployment;
use petri_lp::error::{LpResult, ProtocolError};
use petri_lp::lp::{LogicalProcess, RunReport};
use petri_lp::net::{Outgoing, TcpTransport, broadcast_kill, drain, inbound_lanes, wait_for_peers};
use petri_lp::sim::Clock;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(
    name = "petri-lp",
    about = "Run one logical process of a distributed timed Petri net simulation"
)]
struct Args {
    /// Partition index in the topology file
    partition: usize,

    /// Path prefix: reads <prefix>.topology.json and <prefix>.subnet<i>.json
    topology_prefix: PathBuf,
}

fn joined(r: Result<Result<(), ProtocolError>, JoinError>) -> LpResult<()> {
    r??;
    Ok(())
}

async fn run(args: Args) -> LpResult<RunReport> {
    let dep = Deployment::load(args.partition, &args.topology_prefix)?;
    let me = dep.me;
    let settings = dep.settings().clone();
    let topology = Arc::new(dep.topology.clone());
    let lp = LogicalProcess::from_deployment(&dep);
    let kill = lp.shutdown_token();

    let transport = TcpTransport::bind(me, topology.clone()).await?;
    let (lanes, inbound) = inbound_lanes();
    let mut server = tokio::spawn(transport.serve(lanes, kill.clone()));
    wait_for_peers(me, &topology, settings.startup_timeout()).await?;

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let mut sender = tokio::spawn(drain(me, topology.clone(), out_rx, kill.clone()));

    let end = Clock(settings.cycles);
    let sim = lp.run(Clock::ZERO, end, inbound, out_tx.clone());
    tokio::pin!(sim);
    let mut server_done = false;
    let mut sender_done = false;
    let outcome = loop {
        tokio::select! {
            r = &mut sim => break r,
            r = &mut server, if !server_done => {
                // 正常返回说明收到了 Kill，核心随后自行结束
                server_done = true;
                if let Err(e) = joined(r) {
                    break Err(e);
                }
            }
            r = &mut sender, if !sender_done => {
                sender_done = true;
                if let Err(e) = joined(r) {
                    break Err(e);
                }
            }
        }
    };

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            broadcast_kill(me, &topology).await;
            return Err(e);
        }
    };

    if !report.killed {
        let _ = out_tx.send(Outgoing::Kill);
    }
    drop(out_tx);
    if !sender_done {
        joined(sender.await)?;
    }
    kill.cancel();
    if !server_done {
        joined(server.await)?;
    }
    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();
    info!(partition = args.partition, prefix = %args.topology_prefix.display(), "▶️  启动逻辑进程");

    match run(args).await {
        Ok(report) => {
            for r in report.firings.records() {
                println!("firing transition={} clock={}", r.transition.0, r.clock.0);
            }
            println!(
                "throughput events={} elapsed_ms={} events_per_sec={:.2}",
                report.throughput.events,
                report.throughput.elapsed.as_millis(),
                report.throughput.events_per_sec()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "❌ 逻辑进程失败");
            ExitCode::FAILURE
        }
    }
}
