//! Engine limits and sampling sizes.

use crate::EngineError;

/// Sampling sizes and execution limits used across the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Rows materialized for a concept preview.
    pub preview_rows: usize,
    /// Values considered by type inference.
    pub inference_sample: usize,
    /// Rows each generated candidate is test-run on.
    pub candidate_sample_rows: usize,
    /// Upper bound on rows read from an alignment table per call.
    pub max_scan_rows: usize,
    /// Interpreter steps allowed per row.
    pub step_budget: u64,
    /// Sample values sent per input field in a generation request.
    pub field_sample_values: usize,
    /// Table rows sent in a generation request.
    pub request_row_sample: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preview_rows: 150,
            inference_sample: 100,
            candidate_sample_rows: 10,
            max_scan_rows: 10_000,
            step_budget: formulator_dsl::DEFAULT_STEP_BUDGET,
            field_sample_values: 5,
            request_row_sample: 50,
        }
    }
}

const ENV_KEYS: &[&str] = &[
    "FORMULATOR_PREVIEW_ROWS",
    "FORMULATOR_INFERENCE_SAMPLE",
    "FORMULATOR_CANDIDATE_SAMPLE_ROWS",
    "FORMULATOR_MAX_SCAN_ROWS",
    "FORMULATOR_STEP_BUDGET",
    "FORMULATOR_FIELD_SAMPLE_VALUES",
    "FORMULATOR_REQUEST_ROW_SAMPLE",
];

impl EngineConfig {
    /// Defaults overridden by `FORMULATOR_*` environment variables.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let mut config = Self::default();
        for key in ENV_KEYS {
            let Some(raw) = lookup(key) else { continue };
            let value: u64 = raw.trim().parse().map_err(|_| {
                EngineError::Config(format!("{key} must be a non-negative integer, got {raw:?}"))
            })?;
            let as_usize = usize::try_from(value)
                .map_err(|_| EngineError::Config(format!("{key} is too large")))?;
            match *key {
                "FORMULATOR_PREVIEW_ROWS" => config.preview_rows = as_usize,
                "FORMULATOR_INFERENCE_SAMPLE" => config.inference_sample = as_usize,
                "FORMULATOR_CANDIDATE_SAMPLE_ROWS" => config.candidate_sample_rows = as_usize,
                "FORMULATOR_MAX_SCAN_ROWS" => config.max_scan_rows = as_usize,
                "FORMULATOR_STEP_BUDGET" => config.step_budget = value,
                "FORMULATOR_FIELD_SAMPLE_VALUES" => config.field_sample_values = as_usize,
                "FORMULATOR_REQUEST_ROW_SAMPLE" => config.request_row_sample = as_usize,
                _ => {}
            }
        }
        Ok(config)
    }

    /// Executor limits for a call returning at most `sample_limit` rows.
    pub fn limits(&self, sample_limit: usize) -> crate::executor::Limits {
        crate::executor::Limits {
            sample_limit,
            max_scan_rows: self.max_scan_rows,
            step_budget: self.step_budget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.preview_rows, 150);
        assert_eq!(config.inference_sample, 100);
        assert_eq!(config.candidate_sample_rows, 10);
        assert_eq!(config.max_scan_rows, 10_000);
        assert_eq!(config.step_budget, 10_000);
        assert_eq!(config.field_sample_values, 5);
        assert_eq!(config.request_row_sample, 50);
    }

    #[test]
    fn lookup_overrides_and_validates() {
        let config = EngineConfig::from_lookup(|k| match k {
            "FORMULATOR_PREVIEW_ROWS" => Some("20".into()),
            "FORMULATOR_STEP_BUDGET" => Some(" 500 ".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.preview_rows, 20);
        assert_eq!(config.step_budget, 500);
        assert_eq!(config.inference_sample, 100);

        let err = EngineConfig::from_lookup(|k| {
            (k == "FORMULATOR_MAX_SCAN_ROWS").then(|| "-1".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
