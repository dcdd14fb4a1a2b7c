//! Engine counters with Prometheus text export.
//!
//! Plain atomics, no registry crate. Everything here is monotonic; rates and
//! alerting live in the scrape pipeline, not in the process.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Default)]
pub struct EngineMetrics {
    pub pots_created: AtomicU64,
    pub pot_joins: AtomicU64,
    pub tickets_sold: AtomicU64,
    pub pots_locked: AtomicU64,
    pub pots_settled: AtomicU64,
    pub pots_cancelled: AtomicU64,

    pub battles_created: AtomicU64,
    pub battle_joins: AtomicU64,
    pub battles_completed: AtomicU64,
    pub battles_cancelled: AtomicU64,
    pub rounds_resolved: AtomicU64,

    pub amount_debited: AtomicU64,
    pub amount_credited: AtomicU64,

    pub commitment_mismatches: AtomicU64,
    pub gateway_timeouts: AtomicU64,
    pub expiry_sweeps: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::SeqCst);
    }

    /// Prometheus text exposition, one counter block per metric.
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        let counters: [(&str, &str, &AtomicU64); 16] = [
            ("caseforge_pots_created_total", "Pots created", &self.pots_created),
            ("caseforge_pot_joins_total", "Successful pot joins", &self.pot_joins),
            ("caseforge_tickets_sold_total", "Tickets sold across all pots", &self.tickets_sold),
            ("caseforge_pots_locked_total", "Pots locked", &self.pots_locked),
            ("caseforge_pots_settled_total", "Pots settled", &self.pots_settled),
            ("caseforge_pots_cancelled_total", "Pots cancelled", &self.pots_cancelled),
            ("caseforge_battles_created_total", "Battles created", &self.battles_created),
            ("caseforge_battle_joins_total", "Successful battle joins", &self.battle_joins),
            ("caseforge_battles_completed_total", "Battles completed", &self.battles_completed),
            ("caseforge_battles_cancelled_total", "Battles cancelled", &self.battles_cancelled),
            ("caseforge_rounds_resolved_total", "Battle rounds resolved", &self.rounds_resolved),
            ("caseforge_amount_debited_total", "Minor units debited from users", &self.amount_debited),
            ("caseforge_amount_credited_total", "Minor units credited to users", &self.amount_credited),
            ("caseforge_commitment_mismatches_total", "Reveals that failed commitment verification", &self.commitment_mismatches),
            ("caseforge_gateway_timeouts_total", "Ledger/storage calls that hit their deadline", &self.gateway_timeouts),
            ("caseforge_expiry_sweeps_total", "Sweeper passes over expired pots", &self.expiry_sweeps),
        ];

        for (name, help, counter) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
                counter.load(Ordering::SeqCst)
            ));
        }

        output
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            pots_created: self.pots_created.load(Ordering::SeqCst),
            pot_joins: self.pot_joins.load(Ordering::SeqCst),
            tickets_sold: self.tickets_sold.load(Ordering::SeqCst),
            pots_locked: self.pots_locked.load(Ordering::SeqCst),
            pots_settled: self.pots_settled.load(Ordering::SeqCst),
            pots_cancelled: self.pots_cancelled.load(Ordering::SeqCst),
            battles_created: self.battles_created.load(Ordering::SeqCst),
            battle_joins: self.battle_joins.load(Ordering::SeqCst),
            battles_completed: self.battles_completed.load(Ordering::SeqCst),
            battles_cancelled: self.battles_cancelled.load(Ordering::SeqCst),
            rounds_resolved: self.rounds_resolved.load(Ordering::SeqCst),
            amount_debited: self.amount_debited.load(Ordering::SeqCst),
            amount_credited: self.amount_credited.load(Ordering::SeqCst),
            commitment_mismatches: self.commitment_mismatches.load(Ordering::SeqCst),
            gateway_timeouts: self.gateway_timeouts.load(Ordering::SeqCst),
            expiry_sweeps: self.expiry_sweeps.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time counter values for the JSON metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub pots_created: u64,
    pub pot_joins: u64,
    pub tickets_sold: u64,
    pub pots_locked: u64,
    pub pots_settled: u64,
    pub pots_cancelled: u64,
    pub battles_created: u64,
    pub battle_joins: u64,
    pub battles_completed: u64,
    pub battles_cancelled: u64,
    pub rounds_resolved: u64,
    pub amount_debited: u64,
    pub amount_credited: u64,
    pub commitment_mismatches: u64,
    pub gateway_timeouts: u64,
    pub expiry_sweeps: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_format_carries_counts() {
        let metrics = EngineMetrics::new();
        EngineMetrics::incr(&metrics.pots_created);
        EngineMetrics::add(&metrics.tickets_sold, 7);

        let text = metrics.to_prometheus_format();
        assert!(text.contains("caseforge_pots_created_total 1"));
        assert!(text.contains("caseforge_tickets_sold_total 7"));
        assert!(text.contains("# TYPE caseforge_pots_settled_total counter"));
    }

    #[test]
    fn test_snapshot_mirrors_counters() {
        let metrics = EngineMetrics::new();
        EngineMetrics::incr(&metrics.battles_completed);
        EngineMetrics::add(&metrics.amount_credited, 500);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.battles_completed, 1);
        assert_eq!(snapshot.amount_credited, 500);
        assert_eq!(snapshot.pots_created, 0);
    }
}
