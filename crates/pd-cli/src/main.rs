//! Reference harness for a PD session: publishes a demo dataset toward
//! `--target-ip`, subscribes to whatever it publishes (handy when run
//! against itself or a loopback peer), and issues one PULL against the
//! statistics com id to exercise the request/reply path end to end.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use clap::Parser;
use pd_core::config::{DEFAULT_PD_PORT, STATISTICS_PULL_COMID};
use pd_core::{Address, ElementFlags, Session, SessionConfig};
use pd_timing::Nanos;
use tracing::{info, warn};

/// PD session reference harness.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// This host's own IP address, dotted-quad.
    #[arg(short = 'o', long = "own-ip")]
    own_ip: Ipv4Addr,

    /// Address the statistics PULL reply should be sent to, dotted-quad.
    #[arg(short = 'r', long = "reply-ip")]
    reply_ip: Ipv4Addr,

    /// Destination for the demo publication, dotted-quad.
    #[arg(short = 't', long = "target-ip")]
    target_ip: Ipv4Addr,

    /// UDP port to bind.
    #[arg(short = 'p', long, default_value_t = DEFAULT_PD_PORT)]
    port: u16,

    /// Publication cycle time in milliseconds.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// com id used for the demo publication/subscription.
    #[arg(long, default_value_t = 1000)]
    com_id: u32,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = SessionConfig {
        port: args.port,
        own_ip: u32::from(args.own_ip),
        ..Default::default()
    };
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], args.port));

    let mut session = Session::new(config, bind_addr).expect("bind PD session");
    info!(local = ?session.local_addr().unwrap(), "session bound");

    let publish_addr = Address {
        com_id: args.com_id,
        src_ip: u32::from(args.own_ip),
        dst_ip: u32::from(args.target_ip),
        etb_topo_cnt: 0,
        op_trn_topo_cnt: 0,
    };
    let pub_id = session
        .publish(publish_addr, Nanos::from_millis(args.interval_ms), ElementFlags::empty(), None)
        .expect("register demo publication");
    session.update_payload(pub_id, b"pd-cli demo dataset").expect("seed initial payload");

    let subscribe_addr = Address { com_id: args.com_id, src_ip: 0, dst_ip: 0, etb_topo_cnt: 0, op_trn_topo_cnt: 0 };
    session.subscribe(
        subscribe_addr,
        Nanos::from_millis(args.interval_ms * 3),
        ElementFlags::CALLBACK,
        Some(Box::new(|info, payload| {
            info!(com_id = info.com_id, src_ip = info.src_ip, bytes = payload.len(), "received dataset");
        })),
    );

    session.pull(
        Address {
            com_id: STATISTICS_PULL_COMID,
            src_ip: 0,
            dst_ip: u32::from(args.target_ip),
            etb_topo_cnt: 0,
            op_trn_topo_cnt: 0,
        },
        STATISTICS_PULL_COMID,
        u32::from(args.reply_ip),
    );

    let running = install_shutdown_handler();

    info!("entering session loop, press ctrl-c to stop");
    while running.load(Ordering::Relaxed) {
        if let Err(err) = session.process() {
            warn!(%err, "session tick reported an error");
        }
        thread::sleep(Duration::from_millis(10));
    }

    info!(stats = ?session.stats(), "shutting down");
}

fn install_shutdown_handler() -> &'static AtomicBool {
    static RUNNING: AtomicBool = AtomicBool::new(true);
    ctrlc::set_handler(|| RUNNING.store(false, Ordering::Relaxed)).expect("install ctrl-c handler");
    &RUNNING
}
