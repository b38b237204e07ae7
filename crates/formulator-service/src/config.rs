//! Service endpoint configuration.

use crate::protocol::ModelRef;
use crate::ServiceError;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

pub const ENV_BASE_URL: &str = "FORMULATOR_SERVICE_URL";
pub const ENV_TIMEOUT_SECS: &str = "FORMULATOR_SERVICE_TIMEOUT_SECS";
pub const ENV_MODEL_ENDPOINT: &str = "FORMULATOR_MODEL_ENDPOINT";
pub const ENV_MODEL: &str = "FORMULATOR_MODEL";

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Endpoints are resolved relative to this URL; always ends in `/`.
    pub base_url: String,
    /// Requests still pending after this long are abandoned.
    pub timeout: Duration,
    pub model: Option<ModelRef>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            model: None,
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by `FORMULATOR_*` environment variables.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the
    /// `FORMULATOR_*` keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServiceError> {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_BASE_URL) {
            config = config.with_base_url(&url)?;
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                ServiceError::Config(format!("{ENV_TIMEOUT_SECS} must be whole seconds, got {secs:?}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(model) = lookup(ENV_MODEL) {
            config.model = Some(ModelRef {
                endpoint: lookup(ENV_MODEL_ENDPOINT).unwrap_or_default(),
                model,
            });
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, url: &str) -> Result<Self, ServiceError> {
        let mut text = url.trim().to_string();
        if !text.ends_with('/') {
            text.push('/');
        }
        Url::parse(&text)
            .map_err(|e| ServiceError::Config(format!("invalid service URL {url:?}: {e}")))?;
        self.base_url = text;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        Url::parse(&self.base_url)
            .and_then(|base| base.join(path))
            .map_err(|e| ServiceError::Config(format!("invalid endpoint {path:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(20));
        assert_eq!(
            config.endpoint("derive-concept-request").unwrap().as_str(),
            "http://localhost:5000/derive-concept-request"
        );
    }

    #[test]
    fn lookup_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_BASE_URL, "https://example.com/api"),
            (ENV_TIMEOUT_SECS, "5"),
            (ENV_MODEL, "gpt-x"),
        ]);
        let config = ServiceConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(
            config.endpoint("clean-data").unwrap().as_str(),
            "https://example.com/api/clean-data"
        );
        assert_eq!(config.model.unwrap().model, "gpt-x");
    }

    #[test]
    fn rejects_bad_values() {
        let bad_timeout = ServiceConfig::from_lookup(|k| {
            (k == ENV_TIMEOUT_SECS).then(|| "soon".to_string())
        });
        assert!(matches!(bad_timeout, Err(ServiceError::Config(_))));
        assert!(ServiceConfig::default().with_base_url("not a url").is_err());
    }
}
