// reqwest-backed SupplierGateway. Availability travels as XML, the booking
// endpoints as JSON. This layer only maps transport and status codes onto
// the error taxonomy; retry decisions belong to the RetryExecutor.

use crate::availability;
use crate::model::Offer;
use crate::supplier::{
    BookRequest, BookResponse, CancelAck, PreBookRequest, PreBookResponse, SearchCriteria,
    SupplierError, SupplierGateway,
};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            timeout_ms: 10_000,
        }
    }
}

/// Error envelope the supplier returns on booking endpoints.
#[derive(Debug, serde::Deserialize)]
struct SupplierErrorBody {
    code: String,
    message: String,
}

pub struct HttpSupplierGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpSupplierGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, SupplierError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SupplierError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn map_transport(&self, error: reqwest::Error) -> SupplierError {
        if error.is_timeout() {
            SupplierError::Timeout(self.config.timeout_ms)
        } else {
            SupplierError::Network(error.to_string())
        }
    }

    /// Maps a non-2xx response onto the taxonomy. Business rejections come
    /// in a JSON envelope with a machine code; anything else falls back to
    /// the status class.
    fn map_failure(status: StatusCode, body: &str) -> SupplierError {
        if let Ok(envelope) = serde_json::from_str::<SupplierErrorBody>(body) {
            match envelope.code.as_str() {
                "OFFER_UNAVAILABLE" => return SupplierError::Unavailable(envelope.message),
                "INVALID_OFFER" => return SupplierError::InvalidOffer(envelope.message),
                "TOKEN_EXPIRED" => return SupplierError::TokenExpired(envelope.message),
                "GUEST_REJECTED" => return SupplierError::GuestRejected(envelope.message),
                _ => {}
            }
        }
        match status {
            StatusCode::TOO_MANY_REQUESTS => SupplierError::RateLimited(body.to_string()),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                SupplierError::Timeout(0)
            }
            status if status.is_server_error() => SupplierError::Api {
                status_code: status.as_u16(),
                message: body.to_string(),
                retryable: true,
            },
            status => SupplierError::Api {
                status_code: status.as_u16(),
                message: body.to_string(),
                retryable: false,
            },
        }
    }

    async fn read_failure(response: reqwest::Response) -> SupplierError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::map_failure(status, &body)
    }
}

#[async_trait]
impl SupplierGateway for HttpSupplierGateway {
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<Offer>, SupplierError> {
        let body = availability::encode_avail_request(criteria)
            .map_err(|e| SupplierError::Decode(e.to_string()))?;
        let response = self
            .client
            .post(self.endpoint("avail"))
            .header("X-Api-Key", &self.config.api_key)
            .header(CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            return Err(Self::read_failure(response).await);
        }
        let xml = response
            .text()
            .await
            .map_err(|e| self.map_transport(e))?;
        availability::decode_avail_response(&xml).map_err(|e| SupplierError::Decode(e.to_string()))
    }

    async fn pre_book(&self, request: &PreBookRequest) -> Result<PreBookResponse, SupplierError> {
        let response = self
            .client
            .post(self.endpoint("prebook"))
            .header("X-Api-Key", &self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            return Err(Self::read_failure(response).await);
        }
        response
            .json::<PreBookResponse>()
            .await
            .map_err(|e| SupplierError::Decode(e.to_string()))
    }

    async fn book(&self, request: &BookRequest) -> Result<BookResponse, SupplierError> {
        let response = self
            .client
            .post(self.endpoint("book"))
            .header("X-Api-Key", &self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            return Err(Self::read_failure(response).await);
        }
        response
            .json::<BookResponse>()
            .await
            .map_err(|e| SupplierError::Decode(e.to_string()))
    }

    async fn cancel(&self, booking_id: &str) -> Result<CancelAck, SupplierError> {
        let response = self
            .client
            .post(self.endpoint(&format!("bookings/{booking_id}/cancel")))
            .header("X-Api-Key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            return Err(Self::read_failure(response).await);
        }
        response
            .json::<CancelAck>()
            .await
            .map_err(|e| SupplierError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_join_tolerates_trailing_slash() {
        let gateway = HttpSupplierGateway::new(GatewayConfig {
            base_url: "https://api.supplier.test/".to_string(),
            ..GatewayConfig::default()
        })
        .unwrap();
        assert_eq!(gateway.endpoint("avail"), "https://api.supplier.test/avail");
    }

    #[test]
    fn business_envelope_beats_status_class() {
        let body = r#"{"code":"OFFER_UNAVAILABLE","message":"room gone"}"#;
        assert!(matches!(
            HttpSupplierGateway::map_failure(StatusCode::CONFLICT, body),
            SupplierError::Unavailable(_)
        ));

        let body = r#"{"code":"TOKEN_EXPIRED","message":"hold lapsed upstream"}"#;
        assert!(matches!(
            HttpSupplierGateway::map_failure(StatusCode::BAD_REQUEST, body),
            SupplierError::TokenExpired(_)
        ));
    }

    #[test]
    fn status_classes_map_to_retryability() {
        let err = HttpSupplierGateway::map_failure(StatusCode::SERVICE_UNAVAILABLE, "oops");
        assert!(err.is_retryable());

        let err = HttpSupplierGateway::map_failure(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, SupplierError::RateLimited(_)));

        let err = HttpSupplierGateway::map_failure(StatusCode::BAD_REQUEST, "nonsense");
        assert!(!err.is_retryable());
    }
}
