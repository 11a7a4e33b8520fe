//! Ping/pong node: a server that answers every `Ping`, a client that performs N round trips.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use envelink_core::{impl_message, Role, Socket, Step};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::NodeConfig;

/// Poll steps per tick before yielding back to the timer.
const MAX_STEPS_PER_TICK: usize = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ping {
    pub seq: u64,
}
impl_message!(Ping, "envelink.node.Ping");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pong {
    pub seq: u64,
    /// Total pings this server has answered, this one included.
    pub served: u64,
}
impl_message!(Pong, "envelink.node.Pong");

/// Build the socket from config and run the role's loop until done or interrupted.
pub async fn run(cfg: &NodeConfig) -> anyhow::Result<()> {
    let socket = Socket::with_options(&cfg.socket_options(), None)?;
    info!(
        endpoint = %cfg.endpoint,
        role = ?cfg.role,
        pattern = ?cfg.pattern,
        "socket open"
    );
    let interval = Duration::from_millis(cfg.poll_interval_ms.max(1));
    match cfg.role {
        Role::Server => serve(socket, interval).await,
        Role::Client => ping(socket, interval, cfg.ping_count).await,
    }
}

async fn serve(mut socket: Socket, interval: Duration) -> anyhow::Result<()> {
    let replies = socket.sender();
    let served = Arc::new(AtomicU64::new(0));
    let counter = served.clone();
    socket.subscribe(Ping::default(), move |p: &Ping| {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if let Err(e) = replies.send(Pong { seq: p.seq, served: n }) {
            warn!(error = %e, seq = p.seq, "could not queue reply");
        }
    });
    drive(&mut socket, interval, || false).await?;
    info!(served = served.load(Ordering::Relaxed), "server stopped");
    Ok(())
}

async fn ping(mut socket: Socket, interval: Duration, count: u64) -> anyhow::Result<()> {
    if count == 0 {
        return Ok(());
    }
    let requests = socket.sender();
    let received = Arc::new(AtomicU64::new(0));
    let counter = received.clone();
    let started = Instant::now();
    socket.subscribe(Pong::default(), move |p: &Pong| {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        info!(seq = p.seq, served = p.served, "pong");
        if n < count {
            if let Err(e) = requests.send(Ping { seq: n }) {
                warn!(error = %e, seq = n, "could not queue ping");
            }
        }
    });
    socket.send_message(Ping { seq: 0 })?;
    let finished = drive(&mut socket, interval, || {
        received.load(Ordering::Relaxed) >= count
    })
    .await?;
    let n = received.load(Ordering::Relaxed);
    let elapsed = started.elapsed();
    if finished {
        info!(
            round_trips = n,
            avg_us = elapsed.as_micros() as u64 / n.max(1),
            "client done"
        );
    } else {
        info!(round_trips = n, "client interrupted");
    }
    Ok(())
}

/// Poll `socket` every `interval` until `done` holds or a shutdown signal arrives.
/// Returns true when `done` ended the loop. Unroutable messages and transport
/// failures other than a peer disconnect stop the node.
async fn drive<F>(socket: &mut Socket, interval: Duration, mut done: F) -> anyhow::Result<bool>
where
    F: FnMut() -> bool,
{
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = crate::shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                return Ok(false);
            }
            _ = tick.tick() => {
                poll_burst(socket)?;
                if done() {
                    return Ok(true);
                }
            }
        }
    }
}

fn poll_burst(socket: &mut Socket) -> anyhow::Result<()> {
    for _ in 0..MAX_STEPS_PER_TICK {
        match socket.run() {
            Ok(Step::Idle) => break,
            Ok(Step::Sent | Step::Received) => {}
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "poll step failed, continuing");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
