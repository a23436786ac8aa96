// Refund computation for cancellations, tiered by whole days between the
// cancellation and check-in. Pure; no clock, no I/O.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub full_refund_days: i64,
    pub half_refund_days: i64,
    pub quarter_refund_days: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            full_refund_days: 7,
            half_refund_days: 3,
            quarter_refund_days: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefundTerms {
    pub refund_amount: f64,
    pub refund_percentage: u8,
    pub policy_label: String,
}

#[derive(Debug, Clone, Default)]
pub struct CancellationPolicy {
    config: PolicyConfig,
}

impl CancellationPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Day counts use ceil(gap / 1 day); tier lower bounds are inclusive,
    /// so exactly 7 days is a full refund and exactly 1 day still refunds a
    /// quarter. Anything under a full day (including past check-in) refunds
    /// nothing.
    pub fn compute(
        &self,
        total_price: f64,
        check_in: DateTime<Utc>,
        cancelled_at: DateTime<Utc>,
    ) -> RefundTerms {
        let gap = check_in - cancelled_at;
        let (percentage, label) = if gap < chrono::Duration::days(1) {
            (0, "NON_REFUNDABLE")
        } else {
            let seconds = gap.num_seconds();
            let days = (seconds + 86_399) / 86_400;
            if days >= self.config.full_refund_days {
                (100, "FULL_REFUND")
            } else if days >= self.config.half_refund_days {
                (50, "HALF_REFUND")
            } else {
                (25, "QUARTER_REFUND")
            }
        };

        RefundTerms {
            refund_amount: total_price * f64::from(percentage) / 100.0,
            refund_percentage: percentage,
            policy_label: label.to_string(),
        }
    }
}
