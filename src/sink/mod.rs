pub mod flush;
pub mod graphite;
pub mod state;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::wire::event::Observation;

use self::flush::Flusher;
use self::graphite::GraphiteClient;
use self::state::Aggregator;

/// Maximum queued observations before producers start dropping.
pub const MAX_PENDING_OBSERVATIONS: usize = 1000;

/// How many queued observations the run loop drains per wakeup.
const BATCH_SIZE: usize = 256;

/// The aggregation core.
///
/// One spawned task owns all metric state and selects over shutdown, the
/// flush ticker, and the observation queue. Listeners only ever touch the
/// queue's sender half.
pub struct StatsSink {
    flush_interval: Duration,
    debug_flush: bool,
    flusher: Flusher,
    graphite: Option<GraphiteClient>,
    agg: Option<Aggregator>,
    obs_rx: Option<mpsc::Receiver<Observation>>,
    run_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StatsSink {
    /// Creates the sink and the sender half of its observation queue.
    pub fn new(cfg: &Config) -> (Self, mpsc::Sender<Observation>) {
        let (obs_tx, obs_rx) = mpsc::channel(MAX_PENDING_OBSERVATIONS);

        let graphite = (cfg.graphite != "-").then(|| GraphiteClient::new(cfg.graphite.clone()));

        let sink = Self {
            flush_interval: cfg.flush_interval,
            debug_flush: cfg.debug,
            flusher: Flusher::new(cfg),
            graphite,
            agg: Some(Aggregator::new(
                &cfg.postfix,
                !cfg.receive_counter.is_empty(),
            )),
            obs_rx: Some(obs_rx),
            run_task: tokio::sync::Mutex::new(None),
        };

        (sink, obs_tx)
    }

    /// Spawns the run loop.
    ///
    /// The task exits after one final flush when `ctx` is cancelled.
    pub async fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        let mut obs_rx = self.obs_rx.take().expect("start called more than once");
        let mut agg = self.agg.take().expect("start called more than once");
        let flusher = self.flusher.clone();
        let graphite = self.graphite.clone();
        let interval = self.flush_interval;
        let debug_flush = self.debug_flush;

        let run_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; consume it so the first
            // real flush lands one interval from now.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        Self::flush(&flusher, &mut agg, graphite.as_ref(), interval, debug_flush)
                            .await;
                        return;
                    }

                    _ = ticker.tick() => {
                        Self::flush(&flusher, &mut agg, graphite.as_ref(), interval, debug_flush)
                            .await;
                    }

                    Some(obs) = obs_rx.recv() => {
                        agg.apply(obs);

                        // Drain a bounded batch without yielding back to the
                        // scheduler between observations.
                        for _ in 1..BATCH_SIZE {
                            match obs_rx.try_recv() {
                                Ok(obs) => agg.apply(obs),
                                Err(_) => break,
                            }
                        }
                    }
                }
            }
        });

        *self.run_task.lock().await = Some(run_task);

        info!(interval = ?self.flush_interval, "stats sink started");

        Ok(())
    }

    /// Waits for the run loop to finish its final flush and exit.
    pub async fn wait_for_shutdown(&self) {
        let run_task = { self.run_task.lock().await.take() };
        if let Some(run_task) = run_task {
            if let Err(e) = run_task.await {
                warn!(error = %e, "stats sink task join failed");
            }
        }
    }

    /// Renders and delivers one flush. State is always drained; a failed or
    /// disabled downstream only costs the payload.
    async fn flush(
        flusher: &Flusher,
        agg: &mut Aggregator,
        graphite: Option<&GraphiteClient>,
        deadline: Duration,
        debug_flush: bool,
    ) {
        let payload = flusher.render(agg, unix_now());
        if payload.lines == 0 {
            return;
        }

        if debug_flush {
            for line in payload.data.lines() {
                debug!(%line, "flush");
            }
        }

        match graphite {
            Some(client) => match client.send(payload.data.as_bytes(), deadline).await {
                Ok(()) => {
                    info!(lines = payload.lines, addr = client.addr(), "sent stats to graphite");
                }
                Err(e) => {
                    error!(error = %e, "graphite flush failed, dropping payload");
                }
            },
            None => {
                debug!(lines = payload.lines, "graphite disabled, dropping payload");
            }
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
