//! Expiry sweeper.
//!
//! Periodically scans open pots past their deadline and drives them through
//! the same public operations any caller would use: a pot with sold tickets
//! is locked so it can be settled, an empty one is cancelled outright.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::EngineResult;
use crate::metrics::EngineMetrics;
use crate::pots::PotService;
use crate::types::PotStatus;

/// What one sweep pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub locked: usize,
    pub cancelled: usize,
}

pub struct ExpirySweeper {
    pots: Arc<PotService>,
    metrics: Arc<EngineMetrics>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl ExpirySweeper {
    /// Start the sweeper on its own task and return a handle for `stop()`.
    pub fn spawn(
        pots: Arc<PotService>,
        metrics: Arc<EngineMetrics>,
        interval: Duration,
    ) -> Arc<Self> {
        let sweeper = Arc::new(Self {
            pots,
            metrics,
            interval,
            running: Arc::new(AtomicBool::new(true)),
        });

        sweeper.clone().spawn_task();
        sweeper
    }

    fn spawn_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup does not
            // race service wiring.
            tick.tick().await;

            while self.running.load(Ordering::SeqCst) {
                tick.tick().await;
                match self.sweep_once().await {
                    Ok(report) if report.locked + report.cancelled > 0 => {
                        info!(
                            "Expiry sweep: {} open pots scanned, {} locked, {} cancelled",
                            report.scanned, report.locked, report.cancelled
                        );
                    }
                    Ok(_) => {}
                    Err(err) => warn!("Expiry sweep pass failed: {}", err),
                }
            }
        });
    }

    /// One pass over the open pots. Individual pots that fail to transition
    /// are skipped; a concurrent settle or cancel may have beaten the sweep
    /// to them.
    pub async fn sweep_once(&self) -> EngineResult<SweepReport> {
        let open = self.pots.list_pots(Some(PotStatus::Open)).await?;
        let mut report = SweepReport {
            scanned: open.len(),
            ..SweepReport::default()
        };
        let now = Utc::now();

        for pot in open {
            if !pot.is_expired(now) {
                continue;
            }

            if pot.tickets_sold > 0 {
                match self.pots.lock_pot(pot.id).await {
                    Ok(_) => report.locked += 1,
                    Err(err) => debug!("Sweep skipped pot {}: {}", pot.id, err),
                }
            } else {
                match self.pots.cancel_pot(pot.id).await {
                    Ok(_) => report.cancelled += 1,
                    Err(err) => debug!("Sweep skipped pot {}: {}", pot.id, err),
                }
            }
        }

        EngineMetrics::incr(&self.metrics.expiry_sweeps);
        Ok(report)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
