// Supplier gateway contract: the opaque remote calls the engine orchestrates.
// The supplier is slow, occasionally flaky, and offers no transactional
// guarantees; every failure is classified retryable or terminal here so the
// retry policy is defined once.

use crate::model::{GuestDetails, Offer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SupplierError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timeout after {0}ms")]
    Timeout(u64),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("supplier error: {status_code} - {message}")]
    Api {
        status_code: u16,
        message: String,
        retryable: bool,
    },

    #[error("room no longer available: {0}")]
    Unavailable(String),

    #[error("invalid offer code: {0}")]
    InvalidOffer(String),

    #[error("hold token rejected by supplier: {0}")]
    TokenExpired(String),

    #[error("guest details rejected: {0}")]
    GuestRejected(String),

    #[error("caller deadline exceeded")]
    DeadlineExceeded,

    #[error("malformed supplier payload: {0}")]
    Decode(String),
}

impl SupplierError {
    /// Transient network/server faults are worth retrying; business rule
    /// violations and caller-side deadlines are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            SupplierError::Network(_)
            | SupplierError::Timeout(_)
            | SupplierError::RateLimited(_) => true,
            SupplierError::Api { retryable, .. } => *retryable,
            SupplierError::Unavailable(_)
            | SupplierError::InvalidOffer(_)
            | SupplierError::TokenExpired(_)
            | SupplierError::GuestRejected(_)
            | SupplierError::DeadlineExceeded
            | SupplierError::Decode(_) => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub destination_code: String,
    pub check_in: String,
    pub check_out: String,
    pub adults: u32,
    pub children: u32,
    pub nationality: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreBookRequest {
    pub offer_key: String,
    pub raw_supplier_payload: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreBookResponse {
    pub token: String,
    pub locked_price: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookRequest {
    pub token: String,
    pub guest: GuestDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookResponse {
    pub booking_id: String,
    pub supplier_reference: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAck {
    pub booking_id: String,
    pub acknowledged: bool,
}

#[async_trait]
pub trait SupplierGateway: Send + Sync + 'static {
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<Offer>, SupplierError>;

    async fn pre_book(&self, request: &PreBookRequest) -> Result<PreBookResponse, SupplierError>;

    async fn book(&self, request: &BookRequest) -> Result<BookResponse, SupplierError>;

    async fn cancel(&self, booking_id: &str) -> Result<CancelAck, SupplierError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(SupplierError::Network("connection reset".to_string()).is_retryable());
        assert!(SupplierError::Timeout(5000).is_retryable());
        assert!(SupplierError::RateLimited("60 rps".to_string()).is_retryable());
        assert!(SupplierError::Api {
            status_code: 503,
            message: "unavailable".to_string(),
            retryable: true,
        }
        .is_retryable());
    }

    #[test]
    fn business_errors_are_terminal() {
        assert!(!SupplierError::Unavailable("ND1".to_string()).is_retryable());
        assert!(!SupplierError::InvalidOffer("bad code".to_string()).is_retryable());
        assert!(!SupplierError::TokenExpired("tok".to_string()).is_retryable());
        assert!(!SupplierError::GuestRejected("lead name".to_string()).is_retryable());
        assert!(!SupplierError::DeadlineExceeded.is_retryable());
        assert!(!SupplierError::Api {
            status_code: 400,
            message: "bad request".to_string(),
            retryable: false,
        }
        .is_retryable());
    }
}
