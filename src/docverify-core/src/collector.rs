//! Raw signal collection.
//!
//! Queries the analysis capability for the four signal families in
//! parallel. Each family has its own timeout, and a family that times out,
//! errors or returns unparseable output degrades to `None` with a recorded
//! [`PartialFailure`]. Collection itself never fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::signals::{
    BiometricSignals, FailureCause, MetadataSignals, OcrSignals, PartialFailure, RawSignals,
    SignalFamily, TamperSignals,
};
use crate::types::DocumentClass;

/// Errors an analysis capability can report for one family.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Transport or service failure.
    #[error("analysis transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// The capability answered, but not with usable output.
    #[error("malformed analysis output: {message}")]
    Malformed {
        /// Error message.
        message: String,
    },
}

/// Black-box multimodal analysis.
///
/// Returns the JSON-shaped output for one signal family. Implementations
/// wrap a model endpoint; tests substitute scripted fakes.
#[async_trait]
pub trait AnalysisCapability: Send + Sync {
    /// Analyze `image` for one signal family.
    async fn analyze(
        &self,
        image: &[u8],
        class: DocumentClass,
        family: SignalFamily,
    ) -> Result<serde_json::Value, CapabilityError>;
}

/// Collects [`RawSignals`] by fanning out one capability call per family.
pub struct RawSignalCollector {
    capability: Arc<dyn AnalysisCapability>,
    timeout: Duration,
}

impl RawSignalCollector {
    /// Create a collector with a per-family timeout.
    pub fn new(capability: Arc<dyn AnalysisCapability>, timeout: Duration) -> Self {
        Self {
            capability,
            timeout,
        }
    }

    /// Collect all four families for one image.
    #[instrument(skip(self, image), fields(class = %class, image_len = image.len()))]
    pub async fn collect(&self, image: &[u8], class: DocumentClass) -> RawSignals {
        let skip_tamper = class.skips_tamper_analysis();

        let tamper_future = async {
            if skip_tamper {
                debug!("Collector: tamper family skipped for class");
                return None;
            }
            Some(self.family::<TamperSignals>(image, class, SignalFamily::Tamper).await)
        };
        let ocr_future = self.family::<OcrSignals>(image, class, SignalFamily::Ocr);
        let metadata_future = self.family::<MetadataSignals>(image, class, SignalFamily::Metadata);
        let biometric_future =
            self.family::<BiometricSignals>(image, class, SignalFamily::Biometric);

        let (tamper, ocr, metadata, biometric) =
            tokio::join!(tamper_future, ocr_future, metadata_future, biometric_future);

        let mut signals = RawSignals::default();
        if skip_tamper {
            signals.skipped.push(SignalFamily::Tamper);
        }
        signals.tamper = tamper.and_then(|r| absorb(r, &mut signals.partial_failures));
        signals.ocr = absorb(ocr, &mut signals.partial_failures);
        signals.metadata = absorb(metadata, &mut signals.partial_failures);
        signals.biometric = absorb(biometric, &mut signals.partial_failures);

        if signals.is_partial() {
            warn!(
                failed = signals.partial_failures.len(),
                families = ?signals
                    .partial_failures
                    .iter()
                    .map(|f| f.family)
                    .collect::<Vec<_>>(),
                "Collector: degraded collection"
            );
        } else {
            info!(skipped = signals.skipped.len(), "Collector: all families collected");
        }
        signals
    }

    /// Query and parse one family, bounded by the per-family timeout.
    async fn family<T: DeserializeOwned>(
        &self,
        image: &[u8],
        class: DocumentClass,
        family: SignalFamily,
    ) -> Result<T, PartialFailure> {
        let call = self.capability.analyze(image, class, family);
        let value = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => value,
            Ok(Err(CapabilityError::Transport { message })) => {
                warn!(%family, "Collector: transport failure: {}", message);
                return Err(PartialFailure {
                    family,
                    cause: FailureCause::Transport,
                    message,
                });
            },
            Ok(Err(CapabilityError::Malformed { message })) => {
                warn!(%family, "Collector: malformed output: {}", message);
                return Err(PartialFailure {
                    family,
                    cause: FailureCause::Malformed,
                    message,
                });
            },
            Err(_) => {
                warn!(%family, "Collector: timed out after {:?}", self.timeout);
                return Err(PartialFailure {
                    family,
                    cause: FailureCause::Timeout,
                    message: format!("no response within {:?}", self.timeout),
                });
            },
        };

        serde_json::from_value(value).map_err(|e| {
            warn!(%family, "Collector: output does not parse: {}", e);
            PartialFailure {
                family,
                cause: FailureCause::Malformed,
                message: e.to_string(),
            }
        })
    }
}

fn absorb<T>(result: Result<T, PartialFailure>, failures: &mut Vec<PartialFailure>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(f) => {
            failures.push(f);
            None
        },
    }
}
