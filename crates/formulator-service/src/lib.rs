//! Formulator generation service boundary
//!
//! The code-generation and data-cleaning backends are external collaborators
//! reached through a request/response protocol:
//!
//! ```text
//! POST {base}/derive-concept-request   DeriveConceptRequest -> DeriveConceptResponse
//! POST {base}/clean-data               CleanDataRequest     -> CleanDataResponse
//! ```
//!
//! [`GenerationService`] abstracts the transport so the engine can be driven
//! by the HTTP client ([`client::HttpGenerationService`], feature `http`) or by
//! an in-process fake in tests. [`request_candidates`] and
//! [`request_cleaning`] add the timeout and the token/status checks every
//! caller needs.

pub mod config;
pub mod protocol;

#[cfg(feature = "http")]
pub mod client;

pub use config::ServiceConfig;
pub use protocol::{
    CleanDataRequest, CleanDataResponse, CleaningCandidate, CleaningInfo, ContentType,
    DeriveConceptRequest, DeriveConceptResponse, InputData, InputFieldInfo, ModelRef,
    RequestToken,
};

#[cfg(feature = "http")]
pub use client::HttpGenerationService;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed service response: {0}")]
    InvalidResponse(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("service reported status {0:?}")]
    Status(String),

    #[error("response token {found} does not match request token {expected}")]
    TokenMismatch {
        expected: RequestToken,
        found: RequestToken,
    },

    #[error("service returned no results")]
    EmptyResult,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Transport to the generation backend.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Ask for candidate procedures deriving a new concept.
    async fn derive_concept(&self, request: &DeriveConceptRequest) -> Result<DeriveConceptResponse>;

    /// Ask for a cleaned, delimited rendition of raw table data.
    async fn clean_data(&self, request: &CleanDataRequest) -> Result<CleanDataResponse>;
}

/// Run `fut`, failing with [`ServiceError::Timeout`] if it takes longer than
/// `timeout`. The future is dropped, not cancelled at the transport.
pub async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout(timeout)),
    }
}

/// Check status and token of a generation response and return its
/// candidate texts in ranking order.
pub fn accept_candidates(
    expected: RequestToken,
    response: DeriveConceptResponse,
) -> Result<Vec<String>> {
    if !response.is_ok() {
        return Err(ServiceError::Status(response.status));
    }
    if response.token != expected {
        warn!(%expected, found = %response.token, "stale generation response ignored");
        return Err(ServiceError::TokenMismatch {
            expected,
            found: response.token,
        });
    }
    Ok(response.result)
}

/// Check status and token of a cleaning response and return its first
/// candidate.
pub fn accept_cleaning(
    expected: RequestToken,
    response: CleanDataResponse,
) -> Result<CleaningCandidate> {
    if !response.is_ok() {
        return Err(ServiceError::Status(response.status));
    }
    if response.token != expected {
        warn!(%expected, found = %response.token, "stale cleaning response ignored");
        return Err(ServiceError::TokenMismatch {
            expected,
            found: response.token,
        });
    }
    response
        .result
        .into_iter()
        .next()
        .ok_or(ServiceError::EmptyResult)
}

/// Send a generation request bounded by `timeout` and validate the reply.
pub async fn request_candidates(
    service: &dyn GenerationService,
    request: &DeriveConceptRequest,
    timeout: Duration,
) -> Result<Vec<String>> {
    debug!(token = %request.token, output = %request.output_name, "requesting candidates");
    let response = with_timeout(timeout, service.derive_concept(request)).await?;
    accept_candidates(request.token, response)
}

/// Send a cleaning request bounded by `timeout` and validate the reply.
pub async fn request_cleaning(
    service: &dyn GenerationService,
    request: &CleanDataRequest,
    timeout: Duration,
) -> Result<CleaningCandidate> {
    debug!(token = %request.token, "requesting data cleaning");
    let response = with_timeout(timeout, service.clean_data(request)).await?;
    accept_cleaning(request.token, response)
}
