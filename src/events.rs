// Append-only, per-session trail of lifecycle events. This is what
// reconciliation replays when the supplier's view and ours disagree, so
// every search/hold/book/cancel transition lands here exactly once.

use crate::clock::Clock;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Supplier hold tokens are credentials; only this many characters survive
/// into the log.
pub const TOKEN_PREFIX_LEN: usize = 6;

/// Truncates a credential to a short, non-reversible prefix.
pub fn redact_token(token: &str) -> String {
    let prefix: String = token.chars().take(TOKEN_PREFIX_LEN).collect();
    if token.chars().count() > TOKEN_PREFIX_LEN {
        format!("{prefix}…")
    } else {
        prefix
    }
}

/// Closed set of lifecycle events. Each variant carries only the fields
/// relevant to it, so a malformed or partial event cannot be constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    SearchStarted {
        destination: String,
    },
    SearchCompleted {
        offer_count: usize,
    },
    SearchFailed {
        error: String,
    },
    PrebookStarted {
        offer_key: String,
    },
    PrebookCompleted {
        offer_key: String,
        token_prefix: String,
        price: f64,
        cached: bool,
        attempts: u32,
    },
    PrebookFailed {
        offer_key: String,
        error: String,
        attempts: u32,
    },
    PrebookExpired {
        offer_key: String,
    },
    BookStarted {
        offer_key: String,
    },
    BookCompleted {
        offer_key: String,
        booking_id: String,
        price: f64,
        attempts: u32,
    },
    BookFailed {
        offer_key: String,
        error: String,
        attempts: u32,
    },
    BookingCancelled {
        booking_id: String,
        offer_key: String,
        refund_amount: f64,
        refund_percentage: u8,
        reason: String,
    },
    EmailSent {
        recipient: String,
        template: String,
    },
    EmailFailed {
        recipient: String,
        template: String,
        error: String,
    },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::SearchStarted { .. } => "search_started",
            EventKind::SearchCompleted { .. } => "search_completed",
            EventKind::SearchFailed { .. } => "search_failed",
            EventKind::PrebookStarted { .. } => "prebook_started",
            EventKind::PrebookCompleted { .. } => "prebook_completed",
            EventKind::PrebookFailed { .. } => "prebook_failed",
            EventKind::PrebookExpired { .. } => "prebook_expired",
            EventKind::BookStarted { .. } => "book_started",
            EventKind::BookCompleted { .. } => "book_completed",
            EventKind::BookFailed { .. } => "book_failed",
            EventKind::BookingCancelled { .. } => "booking_cancelled",
            EventKind::EmailSent { .. } => "email_sent",
            EventKind::EmailFailed { .. } => "email_failed",
        }
    }

    fn offer_key(&self) -> Option<&str> {
        match self {
            EventKind::PrebookStarted { offer_key }
            | EventKind::PrebookCompleted { offer_key, .. }
            | EventKind::PrebookFailed { offer_key, .. }
            | EventKind::PrebookExpired { offer_key }
            | EventKind::BookStarted { offer_key }
            | EventKind::BookCompleted { offer_key, .. }
            | EventKind::BookFailed { offer_key, .. }
            | EventKind::BookingCancelled { offer_key, .. } => Some(offer_key),
            _ => None,
        }
    }

    fn csv_detail(&self) -> String {
        match self {
            EventKind::SearchStarted { destination } => format!("destination={destination}"),
            EventKind::SearchCompleted { offer_count } => format!("offer_count={offer_count}"),
            EventKind::SearchFailed { error } => format!("error={error}"),
            EventKind::PrebookStarted { .. } => String::new(),
            EventKind::PrebookCompleted {
                token_prefix,
                price,
                cached,
                attempts,
                ..
            } => format!("token={token_prefix} price={price} cached={cached} attempts={attempts}"),
            EventKind::PrebookFailed {
                error, attempts, ..
            } => format!("error={error} attempts={attempts}"),
            EventKind::PrebookExpired { .. } => String::new(),
            EventKind::BookStarted { .. } => String::new(),
            EventKind::BookCompleted {
                booking_id,
                price,
                attempts,
                ..
            } => format!("booking_id={booking_id} price={price} attempts={attempts}"),
            EventKind::BookFailed {
                error, attempts, ..
            } => format!("error={error} attempts={attempts}"),
            EventKind::BookingCancelled {
                booking_id,
                refund_amount,
                refund_percentage,
                reason,
                ..
            } => format!(
                "booking_id={booking_id} refund={refund_amount} pct={refund_percentage} reason={reason}"
            ),
            EventKind::EmailSent {
                recipient,
                template,
            } => format!("recipient={recipient} template={template}"),
            EventKind::EmailFailed {
                recipient,
                template,
                error,
            } => format!("recipient={recipient} template={template} error={error}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub seq: u64,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct EventLog {
    sessions: DashMap<String, Vec<Event>>,
    seq: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl EventLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            seq: AtomicU64::new(0),
            clock,
        }
    }

    /// The only mutator. Within a session, order is insertion order; the
    /// global `seq` breaks timestamp ties across sessions on export.
    pub fn append(&self, session_id: &str, kind: EventKind) {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            session_id: session_id.to_string(),
            timestamp: self.clock.now(),
            kind,
        };
        tracing::debug!(
            session_id,
            event_type = event.kind.event_type(),
            "lifecycle event"
        );
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .push(event);
    }

    pub fn session_events(&self, session_id: &str) -> Vec<Event> {
        self.sessions
            .get(session_id)
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Event counts per type for one session.
    pub fn stats(&self, session_id: &str) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        if let Some(events) = self.sessions.get(session_id) {
            for event in events.iter() {
                *counts.entry(event.kind.event_type()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Exports every recorded event across sessions, ordered by `seq`.
    pub fn export(&self, format: ExportFormat) -> Result<Bytes, ExportError> {
        let mut all: Vec<Event> = self
            .sessions
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|event| event.seq);

        match format {
            ExportFormat::Json => Ok(Bytes::from(serde_json::to_vec_pretty(&all)?)),
            ExportFormat::Csv => {
                let mut out = String::from("seq,session_id,timestamp,event_type,offer_key,detail\n");
                for event in &all {
                    out.push_str(&format!(
                        "{},{},{},{},{},{}\n",
                        event.seq,
                        csv_field(&event.session_id),
                        event.timestamp.to_rfc3339(),
                        event.kind.event_type(),
                        csv_field(event.kind.offer_key().unwrap_or("")),
                        csv_field(&event.kind.csv_detail()),
                    ));
                }
                Ok(Bytes::from(out))
            }
        }
    }

    /// Retention cleanup: drops whole sessions whose newest event predates
    /// the cutoff. The one sanctioned deletion path.
    pub fn retention_cleanup(&self, before: DateTime<Utc>) -> usize {
        let before_sessions = self.sessions.len();
        self.sessions.retain(|_, events| {
            events
                .last()
                .map(|event| event.timestamp >= before)
                .unwrap_or(false)
        });
        before_sessions.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}
