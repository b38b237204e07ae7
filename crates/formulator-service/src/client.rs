//! HTTP implementation of [`GenerationService`].

use crate::config::ServiceConfig;
use crate::protocol::{
    CleanDataRequest, CleanDataResponse, DeriveConceptRequest, DeriveConceptResponse,
};
use crate::{GenerationService, Result, ServiceError};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

pub const DERIVE_CONCEPT_PATH: &str = "derive-concept-request";
pub const CLEAN_DATA_PATH: &str = "clean-data";

/// Talks JSON over HTTP to a running service.
pub struct HttpGenerationService {
    client: Client,
    config: ServiceConfig,
}

impl HttpGenerationService {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.config.endpoint(path)?;
        debug!(%url, "posting service request");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Timeout(self.config.timeout)
                } else {
                    ServiceError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(ServiceError::Http {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }
        serde_json::from_str(&text).map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn derive_concept(&self, request: &DeriveConceptRequest) -> Result<DeriveConceptResponse> {
        self.post_json(DERIVE_CONCEPT_PATH, request).await
    }

    async fn clean_data(&self, request: &CleanDataRequest) -> Result<CleanDataResponse> {
        self.post_json(CLEAN_DATA_PATH, request).await
    }
}
