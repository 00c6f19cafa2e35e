use async_trait::async_trait;
use chrono::NaiveDate;
use covenant_types::{Cancellable, CoreError, CoreResult, TextSpan};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Input handed to the extraction capability.
#[derive(Debug, Clone)]
pub enum DocumentContent {
    Text(String),
    Bytes(Vec<u8>),
}

/// One extracted metadata candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataCandidate {
    pub key: String,
    pub value: String,
    pub confidence: f64,
    pub offsets: Option<TextSpan>,
}

/// One extracted obligation candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObligationCandidate {
    pub description: String,
    pub frequency: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub penalty_text: Option<String>,
    pub confidence: f64,
}

/// Full result of one extraction call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub metadata: Vec<MetadataCandidate>,
    pub obligations: Vec<ObligationCandidate>,
}

/// Extraction capability failures, split by retryability.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// Worth retrying with backoff (timeouts, throttling).
    #[error("transient extractor failure: {0}")]
    Transient(String),

    /// Retrying will not help (unsupported format, rejected input).
    #[error("terminal extractor failure: {0}")]
    Terminal(String),
}

/// External AI extraction capability, consumed as a black box.
#[async_trait]
pub trait ExtractionCapability: Send + Sync {
    async fn extract(&self, content: &DocumentContent) -> Result<ExtractionResult, ExtractorError>;
}

/// Call the extractor with bounded retries and doubling backoff.
///
/// Terminal failures and exhausted retries surface as `ExternalService`;
/// cancellation is honored between attempts and never mid-commit (no
/// writes happen here).
pub async fn extract_with_retry(
    extractor: &dyn ExtractionCapability,
    content: &DocumentContent,
    max_attempts: u32,
    base_backoff: Duration,
    cancel: &dyn Cancellable,
) -> CoreResult<ExtractionResult> {
    let mut backoff = base_backoff;
    let attempts = max_attempts.max(1);

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        match extractor.extract(content).await {
            Ok(result) => return Ok(result),
            Err(ExtractorError::Terminal(msg)) => {
                return Err(CoreError::ExternalService(msg));
            }
            Err(ExtractorError::Transient(msg)) => {
                if attempt == attempts {
                    return Err(CoreError::ExternalService(format!(
                        "extractor failed after {attempts} attempts: {msg}"
                    )));
                }
                tracing::warn!(attempt, error = msg.as_str(), "extractor attempt failed; retrying");
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }
    }
    unreachable!("retry loop always returns")
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_types::CancellationToken;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyExtractor {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl ExtractionCapability for FlakyExtractor {
        async fn extract(
            &self,
            _content: &DocumentContent,
        ) -> Result<ExtractionResult, ExtractorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(ExtractionResult::default())
            } else {
                Err(ExtractorError::Transient("throttled".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let extractor = FlakyExtractor {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        };
        let result = extract_with_retry(
            &extractor,
            &DocumentContent::Text("contract".to_string()),
            3,
            Duration::from_millis(1),
            &CancellationToken::new(),
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_external_service() {
        let extractor = FlakyExtractor {
            calls: AtomicU32::new(0),
            succeed_on: 10,
        };
        let result = extract_with_retry(
            &extractor,
            &DocumentContent::Text("contract".to_string()),
            2,
            Duration::from_millis(1),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(CoreError::ExternalService(_))));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let extractor = FlakyExtractor {
            calls: AtomicU32::new(0),
            succeed_on: 1,
        };
        let token = CancellationToken::new();
        token.cancel();
        let result = extract_with_retry(
            &extractor,
            &DocumentContent::Text("contract".to_string()),
            3,
            Duration::from_millis(1),
            &token,
        )
        .await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }
}
