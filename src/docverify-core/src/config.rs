//! Configuration for the verification pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audit::DEFAULT_RETAINED_ENTRIES;
use crate::error::DocVerifyError;
use crate::retry::RetryPolicy;
use crate::scoring::{ScoreThresholds, ScoreWeights};

/// Configuration for the document verification pipeline.
///
/// Durations are (de)serialised as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Timeout for each analysis family call.
    #[serde(with = "duration_ms")]
    pub analysis_timeout: Duration,
    /// Timeout for a single ledger call.
    #[serde(with = "duration_ms")]
    pub ledger_timeout: Duration,
    /// Timeout for a single archive call.
    #[serde(with = "duration_ms")]
    pub archive_timeout: Duration,
    /// Forensic cache TTL.
    #[serde(with = "duration_ms")]
    pub cache_ttl: Duration,
    /// Maximum cached reports before eviction.
    pub cache_capacity: usize,
    /// Approve/review cut points.
    pub thresholds: ScoreThresholds,
    /// Sub-score weights for the overall score.
    pub weights: ScoreWeights,
    /// Minimum confidence for a biometric match to force review.
    pub biometric_match_threshold: f64,
    /// Backoff policy for retryable archive failures.
    pub archive_retry: RetryPolicy,
    /// Interval of the background permission cleanup task.
    #[serde(with = "duration_ms")]
    pub cleanup_interval: Duration,
    /// Ledger schema id for attestations.
    pub attestation_schema: String,
    /// Issuer identity recorded on attestations.
    pub issuer_id: String,
    /// Symbol for minted document tokens.
    pub token_symbol: String,
    /// Audit entries kept in memory. Older entries live only in the JSONL file.
    pub audit_retained_entries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis_timeout: Duration::from_secs(30),
            ledger_timeout: Duration::from_secs(30),
            archive_timeout: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(60 * 60), // 1 hour
            cache_capacity: 10_000,
            thresholds: ScoreThresholds::default(),
            weights: ScoreWeights::default(),
            biometric_match_threshold: 0.95,
            archive_retry: RetryPolicy::default(),
            cleanup_interval: Duration::from_secs(15 * 60),
            attestation_schema: "docverify.identity.v1".into(),
            issuer_id: "docverify-issuer".into(),
            token_symbol: "DOC".into(),
            audit_retained_entries: DEFAULT_RETAINED_ENTRIES,
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from JSON. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, DocVerifyError> {
        let config: Self = serde_json::from_str(json).map_err(|e| DocVerifyError::Config {
            message: format!("Failed to parse pipeline config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<(), DocVerifyError> {
        self.thresholds.validate()?;
        self.weights.validate()?;
        if !(0.0..=1.0).contains(&self.biometric_match_threshold) {
            return Err(DocVerifyError::Config {
                message: format!(
                    "biometric match threshold {} outside [0, 1]",
                    self.biometric_match_threshold
                ),
            });
        }
        for (name, d) in [
            ("analysis_timeout", self.analysis_timeout),
            ("ledger_timeout", self.ledger_timeout),
            ("archive_timeout", self.archive_timeout),
            ("cleanup_interval", self.cleanup_interval),
        ] {
            if d.is_zero() {
                return Err(DocVerifyError::Config {
                    message: format!("{name} must be non-zero"),
                });
            }
        }
        if self.cache_capacity == 0 {
            return Err(DocVerifyError::Config {
                message: "cache_capacity must be at least 1".into(),
            });
        }
        if self.audit_retained_entries == 0 {
            return Err(DocVerifyError::Config {
                message: "audit_retained_entries must be at least 1".into(),
            });
        }
        if self.token_symbol.trim().is_empty() || self.issuer_id.trim().is_empty() {
            return Err(DocVerifyError::Config {
                message: "issuer_id and token_symbol must be set".into(),
            });
        }
        Ok(())
    }
}

/// Serde adapter for `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }

    /// Same, for `Option<Duration>`.
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => super::serialize(d, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
        }
    }
}
