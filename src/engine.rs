// Orchestrates the reservation lifecycle per offer key: reuse a cached hold,
// create one against the supplier, finalize it into a booking, or reject it.
// All shared state lives in the store; every transition lands in the event
// log exactly once.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::events::{redact_token, EventKind, EventLog};
use crate::model::{
    Booking, BookingStatus, GuestDetails, Hold, HoldStatus, Offer, RequestContext,
};
use crate::policy::{CancellationPolicy, RefundTerms};
use crate::retry::RetryExecutor;
use crate::store::{ReservationStore, StoreError};
use crate::supplier::{BookRequest, PreBookRequest, SearchCriteria, SupplierError, SupplierGateway};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("supplier call failed after {attempts} attempt(s): {source}")]
    Supplier {
        #[source]
        source: SupplierError,
        attempts: u32,
    },

    #[error("hold for offer {0} has expired, request a new hold")]
    HoldExpired(String),

    #[error("hold for offer {offer_key} is {status:?} and cannot be finalized, request a new hold")]
    HoldNotActive {
        offer_key: String,
        status: HoldStatus,
    },

    #[error("hold token does not match the active hold for offer {0}")]
    HoldMismatch(String),

    #[error("reservation store failure")]
    Store(#[from] StoreError),
}

/// A hold handed back to the caller, flagged when it was served from the
/// store instead of a fresh supplier call.
#[derive(Debug, Clone)]
pub struct HeldOffer {
    pub hold: Hold,
    pub cached: bool,
    pub attempts: u32,
}

pub struct ReservationEngine {
    store: Arc<ReservationStore>,
    gateway: Arc<dyn SupplierGateway>,
    retry: RetryExecutor,
    events: Arc<EventLog>,
    policy: CancellationPolicy,
    clock: Arc<dyn Clock>,
    hold_ttl: chrono::Duration,
}

impl ReservationEngine {
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn SupplierGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(ReservationStore::new(config.store.clone(), clock.clone()));
        let events = Arc::new(EventLog::new(clock.clone()));
        Self {
            store,
            gateway,
            retry: RetryExecutor::new(config.retry.clone()),
            events,
            policy: CancellationPolicy::new(config.policy.clone()),
            clock,
            hold_ttl: chrono::Duration::seconds(config.hold_ttl_seconds as i64),
        }
    }

    pub fn with_system_clock(config: EngineConfig, gateway: Arc<dyn SupplierGateway>) -> Self {
        Self::new(config, gateway, Arc::new(SystemClock))
    }

    pub fn store(&self) -> &Arc<ReservationStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// Supplier search pass-through with retry and the search event pair.
    pub async fn search(
        &self,
        criteria: &SearchCriteria,
        ctx: &RequestContext,
    ) -> Result<Vec<Offer>, EngineError> {
        self.events.append(
            &ctx.session_id,
            EventKind::SearchStarted {
                destination: criteria.destination_code.clone(),
            },
        );

        let gateway = Arc::clone(&self.gateway);
        let criteria_for_call = criteria.clone();
        let outcome = self
            .retry
            .execute(ctx.request_deadline, move || {
                let gateway = Arc::clone(&gateway);
                let criteria = criteria_for_call.clone();
                async move { gateway.search(&criteria).await }
            })
            .await;

        match outcome.result {
            Ok(offers) => {
                self.events.append(
                    &ctx.session_id,
                    EventKind::SearchCompleted {
                        offer_count: offers.len(),
                    },
                );
                Ok(offers)
            }
            Err(error) => {
                self.events.append(
                    &ctx.session_id,
                    EventKind::SearchFailed {
                        error: error.to_string(),
                    },
                );
                Err(EngineError::Supplier {
                    source: error,
                    attempts: outcome.attempts,
                })
            }
        }
    }

    /// Returns the active hold for the offer, creating one against the
    /// supplier if none exists. The whole check-then-create sequence runs
    /// under the offer's key lock, so concurrent callers for the same offer
    /// produce exactly one supplier PreBook; callers for other offers are
    /// untouched.
    pub async fn request_hold(
        &self,
        offer: &Offer,
        ctx: &RequestContext,
    ) -> Result<HeldOffer, EngineError> {
        let key_lock = self.store.key_lock(&offer.offer_key);
        let _guard = key_lock.lock().await;

        if let Some(hold) = self.store.get(&offer.offer_key) {
            tracing::debug!(offer_key = %offer.offer_key, "reusing active hold");
            self.events.append(
                &ctx.session_id,
                EventKind::PrebookCompleted {
                    offer_key: hold.offer_key.clone(),
                    token_prefix: redact_token(&hold.token),
                    price: hold.locked_price,
                    cached: true,
                    attempts: 0,
                },
            );
            return Ok(HeldOffer {
                hold,
                cached: true,
                attempts: 0,
            });
        }

        self.events.append(
            &ctx.session_id,
            EventKind::PrebookStarted {
                offer_key: offer.offer_key.clone(),
            },
        );

        let gateway = Arc::clone(&self.gateway);
        let request = PreBookRequest {
            offer_key: offer.offer_key.clone(),
            raw_supplier_payload: offer.raw_supplier_payload.clone(),
        };
        let outcome = self
            .retry
            .execute(ctx.request_deadline, move || {
                let gateway = Arc::clone(&gateway);
                let request = request.clone();
                async move { gateway.pre_book(&request).await }
            })
            .await;

        match outcome.result {
            Ok(response) => {
                let now = self.clock.now();
                let hold = Hold {
                    offer_key: offer.offer_key.clone(),
                    token: response.token,
                    locked_price: response.locked_price,
                    currency: response.currency,
                    created_at: now,
                    expires_at: now + self.hold_ttl,
                    status: HoldStatus::Active,
                };
                if let Err(store_error) = self.store.put(hold.clone()) {
                    self.events.append(
                        &ctx.session_id,
                        EventKind::PrebookFailed {
                            offer_key: offer.offer_key.clone(),
                            error: store_error.to_string(),
                            attempts: outcome.attempts,
                        },
                    );
                    return Err(EngineError::Store(store_error));
                }
                tracing::info!(
                    offer_key = %hold.offer_key,
                    expires_at = %hold.expires_at,
                    attempts = outcome.attempts,
                    "hold created"
                );
                self.events.append(
                    &ctx.session_id,
                    EventKind::PrebookCompleted {
                        offer_key: hold.offer_key.clone(),
                        token_prefix: redact_token(&hold.token),
                        price: hold.locked_price,
                        cached: false,
                        attempts: outcome.attempts,
                    },
                );
                Ok(HeldOffer {
                    hold,
                    cached: false,
                    attempts: outcome.attempts,
                })
            }
            Err(error) => {
                tracing::warn!(
                    offer_key = %offer.offer_key,
                    attempts = outcome.attempts,
                    error = %error,
                    "prebook failed"
                );
                self.events.append(
                    &ctx.session_id,
                    EventKind::PrebookFailed {
                        offer_key: offer.offer_key.clone(),
                        error: error.to_string(),
                        attempts: outcome.attempts,
                    },
                );
                Err(EngineError::Supplier {
                    source: error,
                    attempts: outcome.attempts,
                })
            }
        }
    }

    /// Books against an active hold. Expired or terminal holds are rejected
    /// locally before any network call; a book failure poisons the hold so
    /// the caller must request a fresh one.
    pub async fn finalize(
        &self,
        hold: &Hold,
        guest: &GuestDetails,
        ctx: &RequestContext,
    ) -> Result<Booking, EngineError> {
        let key_lock = self.store.key_lock(&hold.offer_key);
        let _guard = key_lock.lock().await;

        let now = self.clock.now();
        let stored = self.validate_for_booking(hold, now, ctx)?;

        self.events.append(
            &ctx.session_id,
            EventKind::BookStarted {
                offer_key: stored.offer_key.clone(),
            },
        );

        let gateway = Arc::clone(&self.gateway);
        let request = BookRequest {
            token: stored.token.clone(),
            guest: guest.clone(),
        };
        let outcome = self
            .retry
            .execute(ctx.request_deadline, move || {
                let gateway = Arc::clone(&gateway);
                let request = request.clone();
                async move { gateway.book(&request).await }
            })
            .await;

        match outcome.result {
            Ok(response) => {
                self.store.mark_consumed(&stored.offer_key);
                tracing::info!(
                    offer_key = %stored.offer_key,
                    booking_id = %response.booking_id,
                    attempts = outcome.attempts,
                    "booking confirmed"
                );
                self.events.append(
                    &ctx.session_id,
                    EventKind::BookCompleted {
                        offer_key: stored.offer_key.clone(),
                        booking_id: response.booking_id.clone(),
                        price: stored.locked_price,
                        attempts: outcome.attempts,
                    },
                );
                Ok(Booking {
                    booking_id: response.booking_id,
                    supplier_reference: response.supplier_reference,
                    offer_key: stored.offer_key.clone(),
                    final_price: stored.locked_price,
                    currency: stored.currency.clone(),
                    status: BookingStatus::Confirmed,
                })
            }
            Err(error) => {
                self.store.mark_failed(&stored.offer_key);
                tracing::warn!(
                    offer_key = %stored.offer_key,
                    attempts = outcome.attempts,
                    error = %error,
                    "booking failed, hold poisoned"
                );
                self.events.append(
                    &ctx.session_id,
                    EventKind::BookFailed {
                        offer_key: stored.offer_key.clone(),
                        error: error.to_string(),
                        attempts: outcome.attempts,
                    },
                );
                Err(EngineError::Supplier {
                    source: error,
                    attempts: outcome.attempts,
                })
            }
        }
    }

    /// Local precondition check for finalize. Emits the single rejection
    /// event on the way out.
    fn validate_for_booking(
        &self,
        hold: &Hold,
        now: DateTime<Utc>,
        ctx: &RequestContext,
    ) -> Result<Hold, EngineError> {
        match self.store.peek(&hold.offer_key) {
            Some(stored) if stored.is_active_at(now) => {
                if stored.token == hold.token {
                    Ok(stored)
                } else {
                    self.events.append(
                        &ctx.session_id,
                        EventKind::BookFailed {
                            offer_key: hold.offer_key.clone(),
                            error: "hold token does not match the active hold".to_string(),
                            attempts: 0,
                        },
                    );
                    Err(EngineError::HoldMismatch(hold.offer_key.clone()))
                }
            }
            Some(stored) if stored.status == HoldStatus::Expired => {
                self.store.remove(&hold.offer_key);
                self.reject_expired(hold, ctx)
            }
            Some(stored) => {
                self.events.append(
                    &ctx.session_id,
                    EventKind::BookFailed {
                        offer_key: hold.offer_key.clone(),
                        error: format!("hold is {:?}", stored.status),
                        attempts: 0,
                    },
                );
                Err(EngineError::HoldNotActive {
                    offer_key: hold.offer_key.clone(),
                    status: stored.status,
                })
            }
            None => {
                if hold.status != HoldStatus::Active {
                    self.events.append(
                        &ctx.session_id,
                        EventKind::BookFailed {
                            offer_key: hold.offer_key.clone(),
                            error: format!("hold is {:?}", hold.status),
                            attempts: 0,
                        },
                    );
                    return Err(EngineError::HoldNotActive {
                        offer_key: hold.offer_key.clone(),
                        status: hold.status,
                    });
                }
                // Unknown to the store: lapsed and swept, or evicted. Either
                // way the supplier-side lock cannot be trusted anymore.
                self.reject_expired(hold, ctx)
            }
        }
    }

    fn reject_expired(&self, hold: &Hold, ctx: &RequestContext) -> Result<Hold, EngineError> {
        tracing::info!(offer_key = %hold.offer_key, "finalize rejected, hold expired");
        self.events.append(
            &ctx.session_id,
            EventKind::PrebookExpired {
                offer_key: hold.offer_key.clone(),
            },
        );
        Err(EngineError::HoldExpired(hold.offer_key.clone()))
    }

    /// Computes refund terms for a cancellation and records it. The supplier
    /// is notified best-effort: the local view stays authoritative for the
    /// refund, and a failed notification is reconciled later from the event
    /// trail.
    pub async fn cancel(
        &self,
        booking: &Booking,
        check_in: DateTime<Utc>,
        cancelled_at: DateTime<Utc>,
        ctx: &RequestContext,
    ) -> RefundTerms {
        let gateway = Arc::clone(&self.gateway);
        let booking_id = booking.booking_id.clone();
        let outcome = self
            .retry
            .execute(ctx.request_deadline, move || {
                let gateway = Arc::clone(&gateway);
                let booking_id = booking_id.clone();
                async move { gateway.cancel(&booking_id).await }
            })
            .await;
        if let Err(error) = outcome.result {
            tracing::warn!(
                booking_id = %booking.booking_id,
                attempts = outcome.attempts,
                error = %error,
                "supplier cancel not acknowledged"
            );
        }

        let terms = self
            .policy
            .compute(booking.final_price, check_in, cancelled_at);
        self.events.append(
            &ctx.session_id,
            EventKind::BookingCancelled {
                booking_id: booking.booking_id.clone(),
                offer_key: booking.offer_key.clone(),
                refund_amount: terms.refund_amount,
                refund_percentage: terms.refund_percentage,
                reason: terms.policy_label.clone(),
            },
        );
        terms
    }

    /// Remaining validity of the active hold for a key, for the UI countdown.
    pub fn time_remaining(&self, offer_key: &str) -> Duration {
        self.store.time_remaining(offer_key)
    }
}
