// Core entities of the reservation lifecycle: search offers, price-locked
// holds, finalized bookings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// An immutable, priced room/rate fragment returned by search. The
/// `offer_key` is the supplier's room/rate code and the identity used for
/// hold deduplication. `raw_supplier_payload` is passed through to PreBook
/// unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub offer_key: String,
    pub hotel_id: String,
    pub price_quote: f64,
    pub currency: String,
    pub raw_supplier_payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldStatus {
    Active,
    Expired,
    Consumed,
    Failed,
}

/// A time-bounded, price-locked reservation against an offer. The `token` is
/// the supplier-issued credential required to finalize; it must never be
/// logged in full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hold {
    pub offer_key: String,
    pub token: String,
    pub locked_price: f64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: HoldStatus,
}

impl Hold {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// The single "is this hold still valid" predicate.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Active && !self.is_expired_at(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

/// Created by a successful Book call against an active hold. The engine does
/// not retain bookings; the caller owns them after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: String,
    pub supplier_reference: String,
    pub offer_key: String,
    pub final_price: f64,
    pub currency: String,
    pub status: BookingStatus,
}

/// Guest data forwarded opaquely to the supplier on Book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestDetails {
    pub lead_name: String,
    pub email: String,
    pub nationality: String,
}

/// Per-call context carried through every engine operation. The deadline, if
/// set, bounds the supplier call including retries and backoff sleeps.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub session_id: String,
    pub correlation_id: String,
    pub request_deadline: Option<SystemTime>,
}

impl RequestContext {
    pub fn new(session_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            correlation_id: correlation_id.into(),
            request_deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: SystemTime) -> Self {
        self.request_deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(SystemTime::now() + timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hold_validity_is_status_and_time() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let hold = Hold {
            offer_key: "HTL1:RO:ND1".to_string(),
            token: "tok-1".to_string(),
            locked_price: 84.82,
            currency: "GBP".to_string(),
            created_at: t0,
            expires_at: t0 + chrono::Duration::minutes(30),
            status: HoldStatus::Active,
        };

        assert!(hold.is_active_at(t0));
        assert!(hold.is_active_at(t0 + chrono::Duration::minutes(29)));
        // Expiry boundary is inclusive: at expires_at the hold is gone.
        assert!(!hold.is_active_at(t0 + chrono::Duration::minutes(30)));

        let consumed = Hold {
            status: HoldStatus::Consumed,
            ..hold
        };
        assert!(!consumed.is_active_at(t0));
    }
}
