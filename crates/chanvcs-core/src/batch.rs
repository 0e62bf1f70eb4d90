//! Bounded-concurrency batch runner.
//!
//! Items run at most `max_concurrency` at a time. Results come back in input
//! order and one item's failure never stops the others.

use std::future::Future;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::domain::error::{ChanvcsError, Result};
use crate::obs::emit_batch_item_failed;

/// Outcome of one batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult<T> {
    /// Channel id the item worked on.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> BatchItemResult<T> {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Ordered per-item results of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport<T> {
    pub items: Vec<BatchItemResult<T>>,
}

impl<T> BatchReport<T> {
    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| !i.succeeded()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Successful values with their ids, in input order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &T)> {
        self.items
            .iter()
            .filter_map(|i| i.value.as_ref().map(|v| (i.id.as_str(), v)))
    }

    /// `PartialBatchFailure` when any item failed.
    pub fn ensure_success(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(ChanvcsError::PartialBatchFailure {
                failed: self.failed(),
                total: self.total(),
            })
        }
    }
}

/// Run `op` over `ids` with at most `max_concurrency` in flight.
pub async fn run_batch<T, F, Fut>(
    operation: &str,
    ids: Vec<String>,
    max_concurrency: usize,
    op: F,
) -> BatchReport<T>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let items = stream::iter(ids)
        .map(|id| {
            let fut = op(id.clone());
            async move {
                match fut.await {
                    Ok(value) => BatchItemResult {
                        id,
                        value: Some(value),
                        error: None,
                    },
                    Err(err) => {
                        emit_batch_item_failed(operation, &id, &err);
                        BatchItemResult {
                            id,
                            value: None,
                            error: Some(err.to_string()),
                        }
                    }
                }
            }
        })
        .buffered(max_concurrency.max(1))
        .collect()
        .await;
    BatchReport { items }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn preserves_order_and_isolates_failures() {
        let ids = vec!["a", "bad", "c"].into_iter().map(String::from).collect();
        let report = run_batch("test", ids, 2, |id| async move {
            if id == "bad" {
                Err(ChanvcsError::Engine("boom".to_string()))
            } else {
                Ok(id.to_uppercase())
            }
        })
        .await;

        let ids: Vec<&str> = report.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "bad", "c"]);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.values().map(|(_, v)| v.as_str()).collect::<Vec<_>>(), vec!["A", "C"]);
        assert!(matches!(
            report.ensure_success(),
            Err(ChanvcsError::PartialBatchFailure { failed: 1, total: 3 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_the_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let ids = (0..10).map(|i| i.to_string()).collect();

        let report = run_batch("test", ids, 3, |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(report.is_success());
        assert_eq!(report.total(), 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }
}
