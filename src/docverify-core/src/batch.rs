//! Batch submission with pollable progress and cooperative cancellation.
//!
//! Items run one after another on a spawned task. Progress is published
//! on a watch channel after every item; cancelling stops before the next
//! item starts and keeps everything already completed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::decision::DecisionState;
use crate::engine::{SubmissionOutcome, SubmissionRequest, VerificationEngine};
use crate::error::DocVerifyError;
use crate::types::Actor;

/// Where a batch is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Items are still being processed.
    Running,
    /// Every item was processed.
    Completed,
    /// Stopped early; remaining items were not started.
    Cancelled,
}

/// Result of one batch item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    /// Position in the submitted batch.
    pub index: usize,
    /// Item title.
    pub title: String,
    /// Document the item resolved to.
    pub document_id: Option<String>,
    /// Decision state after submission.
    pub decision: Option<DecisionState>,
    /// Overall forensic score.
    pub overall_score: Option<u8>,
    /// Tamper indicators in the report.
    pub tamper_indicators: usize,
    /// Error message if the submission failed.
    pub error: Option<String>,
}

impl BatchItemResult {
    fn from_outcome(index: usize, title: String, outcome: &SubmissionOutcome) -> Self {
        Self {
            index,
            title,
            document_id: Some(outcome.document.id.clone()),
            decision: outcome.decision.as_ref().map(|d| d.state),
            overall_score: outcome.report.as_ref().map(|r| r.overall_score),
            tamper_indicators: outcome
                .report
                .as_ref()
                .map_or(0, |r| r.tamper_indicator_count),
            error: None,
        }
    }

    fn failed(index: usize, title: String, error: &DocVerifyError) -> Self {
        Self {
            index,
            title,
            document_id: None,
            decision: None,
            overall_score: None,
            tamper_indicators: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Snapshot of a running batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    /// Batch id (`bat_` prefix).
    pub batch_id: String,
    /// Current status.
    pub status: BatchStatus,
    /// Items in the batch.
    pub total: usize,
    /// Items processed so far, including failures.
    pub completed: usize,
    /// Results so far, in submission order.
    pub results: Vec<BatchItemResult>,
}

/// Summary of a finished batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Batch id.
    pub batch_id: String,
    /// Final status.
    pub status: BatchStatus,
    /// Items in the batch.
    pub total: usize,
    /// Items processed.
    pub processed: usize,
    /// Items that were never started.
    pub skipped: usize,
    /// Approved items.
    pub approved: usize,
    /// Items waiting for review.
    pub under_review: usize,
    /// Rejected items.
    pub rejected: usize,
    /// Items whose submission failed.
    pub failed: usize,
    /// Tamper indicators across all reports.
    pub total_tamper_indicators: usize,
    /// Mean overall score of items that produced a report.
    pub average_score: f64,
    /// Wall time of the batch.
    #[serde(with = "crate::config::duration_ms")]
    pub elapsed: Duration,
    /// Per-item results.
    pub results: Vec<BatchItemResult>,
}

impl BatchReport {
    fn summarize(progress: BatchProgress, elapsed: Duration) -> Self {
        let count = |state: DecisionState| {
            progress
                .results
                .iter()
                .filter(|r| r.decision == Some(state))
                .count()
        };
        let scores: Vec<f64> = progress
            .results
            .iter()
            .filter_map(|r| r.overall_score.map(f64::from))
            .collect();
        let average_score = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };

        Self {
            approved: count(DecisionState::Approved),
            under_review: count(DecisionState::UnderReview),
            rejected: count(DecisionState::Rejected),
            failed: progress.results.iter().filter(|r| r.error.is_some()).count(),
            total_tamper_indicators: progress.results.iter().map(|r| r.tamper_indicators).sum(),
            average_score,
            processed: progress.completed,
            skipped: progress.total - progress.completed,
            batch_id: progress.batch_id,
            status: progress.status,
            total: progress.total,
            elapsed,
            results: progress.results,
        }
    }
}

/// Handle to a spawned batch.
#[derive(Debug)]
pub struct BatchHandle {
    batch_id: String,
    progress: watch::Receiver<BatchProgress>,
    cancel: Arc<AtomicBool>,
    task: JoinHandle<BatchReport>,
}

impl BatchHandle {
    /// Batch id.
    pub fn id(&self) -> &str {
        &self.batch_id
    }

    /// Latest progress snapshot.
    pub fn progress(&self) -> BatchProgress {
        self.progress.borrow().clone()
    }

    /// Wait until progress changes. Returns `false` once the batch task is gone.
    pub async fn changed(&mut self) -> bool {
        self.progress.changed().await.is_ok()
    }

    /// Ask the batch to stop before its next item.
    pub fn cancel(&self) {
        info!(batch_id = %self.batch_id, "Batch: cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Wait for the batch to finish.
    pub async fn join(self) -> Result<BatchReport, DocVerifyError> {
        self.task.await.map_err(|e| DocVerifyError::Internal {
            message: format!("batch task failed: {e}"),
        })
    }
}

impl VerificationEngine {
    /// Submit several documents as one batch.
    ///
    /// Returns immediately; the items are processed sequentially on a
    /// spawned task.
    pub fn submit_batch(
        self: &Arc<Self>,
        actor: Actor,
        items: Vec<SubmissionRequest>,
    ) -> Result<BatchHandle, DocVerifyError> {
        actor.authenticated()?;
        if items.is_empty() {
            return Err(DocVerifyError::validation("batch contains no documents"));
        }

        let batch_id = format!("bat_{}", uuid::Uuid::new_v4().simple());
        let (tx, rx) = watch::channel(BatchProgress {
            batch_id: batch_id.clone(),
            status: BatchStatus::Running,
            total: items.len(),
            completed: 0,
            results: Vec::with_capacity(items.len()),
        });
        let cancel = Arc::new(AtomicBool::new(false));

        info!(batch_id = %batch_id, items = items.len(), owner = %actor.id, "Batch: started");
        let task = tokio::spawn(run_batch(self.clone(), actor, items, tx, cancel.clone()));

        Ok(BatchHandle {
            batch_id,
            progress: rx,
            cancel,
            task,
        })
    }
}

async fn run_batch(
    engine: Arc<VerificationEngine>,
    actor: Actor,
    items: Vec<SubmissionRequest>,
    tx: watch::Sender<BatchProgress>,
    cancel: Arc<AtomicBool>,
) -> BatchReport {
    let started = Instant::now();

    for (index, item) in items.into_iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            tx.send_modify(|p| p.status = BatchStatus::Cancelled);
            break;
        }
        let title = item.title.clone();
        let result = match engine.submit(&actor, item).await {
            Ok(outcome) => BatchItemResult::from_outcome(index, title, &outcome),
            Err(e) => {
                warn!(index, "Batch: item failed: {}", e);
                BatchItemResult::failed(index, title, &e)
            },
        };
        tx.send_modify(|p| {
            p.results.push(result);
            p.completed += 1;
        });
    }

    tx.send_modify(|p| {
        if p.status == BatchStatus::Running {
            p.status = BatchStatus::Completed;
        }
    });
    let report = BatchReport::summarize(tx.borrow().clone(), started.elapsed());
    info!(
        batch_id = %report.batch_id,
        status = ?report.status,
        processed = report.processed,
        approved = report.approved,
        under_review = report.under_review,
        rejected = report.rejected,
        "Batch: finished"
    );
    report
}
