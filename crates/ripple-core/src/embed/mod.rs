//! Embedding collaborator seam.
//!
//! The engine never computes embeddings itself: everything that needs a
//! vector goes through the [`Embedder`] trait. Failures are retryable
//! ([`EmbedError`]); [`embed_with_retry`] applies the bounded backoff policy
//! before the caller parks the chunk on the persistent retry queue.

pub mod mock;

use std::time::Duration;

use crate::errors::RippleError;

/// Error raised by an embedding collaborator. Always treated as retryable.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct EmbedError(pub String);

impl From<EmbedError> for RippleError {
    fn from(err: EmbedError) -> Self {
        RippleError::EmbeddingUnavailable(err.0)
    }
}

/// Text-to-vector collaborator.
///
/// Implementations must be `Send + Sync` so one embedder can serve the
/// parallel parse phase behind a shared reference.
pub trait Embedder: Send + Sync {
    /// Embed a single text into a fixed-dimensionality vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Dimensionality of vectors produced by this embedder.
    fn dimensions(&self) -> usize;
}

/// Call the embedder with bounded retries and doubling backoff.
///
/// Returns the last error once `max_attempts` is exhausted; the caller
/// decides whether to queue the text for a later pass.
pub fn embed_with_retry(
    embedder: &dyn Embedder,
    text: &str,
    max_attempts: u32,
    backoff_ms: u64,
) -> Result<Vec<f32>, EmbedError> {
    let attempts = max_attempts.max(1);
    let mut backoff = backoff_ms;
    let mut last_error = EmbedError("no attempts made".to_string());
    for attempt in 1..=attempts {
        match embedder.embed(text) {
            Ok(vector) => return Ok(vector),
            Err(err) => {
                tracing::warn!(attempt, error = %err, "embedding attempt failed");
                last_error = err;
                if attempt < attempts {
                    std::thread::sleep(Duration::from_millis(backoff));
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Fails a fixed number of times, then succeeds.
    struct FlakyEmbedder {
        failures: u32,
        calls: AtomicU32,
    }

    impl Embedder for FlakyEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(EmbedError("backend down".to_string()))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    #[test]
    fn retries_through_transient_failures() {
        let embedder = FlakyEmbedder {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let vector = embed_with_retry(&embedder, "hello", 3, 1).unwrap();
        assert_eq!(vector.len(), 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_attempt_budget() {
        let embedder = FlakyEmbedder {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let result = embed_with_retry(&embedder, "hello", 3, 1);
        assert!(result.is_err());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }
}
