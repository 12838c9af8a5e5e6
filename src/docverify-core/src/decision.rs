//! Approval state machine.
//!
//! ```text
//! PENDING ──▶ ANALYZING ──▶ APPROVED
//!                 │   ╲
//!                 │    ╲──▶ UNDER_REVIEW ──(reviewer)──▶ APPROVED | REJECTED
//!                 │
//!                 └──────▶ REJECTED
//! ```
//!
//! The machine decides from the report's recommended action, except that a
//! biometric duplicate under another owner at or above the match threshold
//! always lands in UNDER_REVIEW. Only a reviewer moves a decision out of
//! UNDER_REVIEW.
//!
//! A failed analysis does not leave ANALYZING. The failure is recorded on
//! the decision and a later resubmission resumes from there.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::biometric::BiometricMatch;
use crate::error::DocVerifyError;
use crate::scoring::{ForensicReport, RecommendedAction};
use crate::types::{Actor, ActorRole};

/// State of a document's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionState {
    /// Submitted, analysis not started.
    Pending,
    /// Analysis running.
    Analyzing,
    /// Approved automatically or by a reviewer.
    Approved,
    /// Waiting for a human reviewer.
    UnderReview,
    /// Rejected automatically or by a reviewer.
    Rejected,
}

impl DecisionState {
    /// Whether the machine allows `self -> next`.
    ///
    /// This does not check who is asking; leaving UNDER_REVIEW additionally
    /// requires a reviewer.
    #[must_use]
    pub const fn can_transition_to(&self, next: DecisionState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Analyzing)
                | (Self::Analyzing, Self::Approved)
                | (Self::Analyzing, Self::UnderReview)
                | (Self::Analyzing, Self::Rejected)
                | (Self::UnderReview, Self::Approved)
                | (Self::UnderReview, Self::Rejected)
        )
    }

    /// APPROVED or REJECTED.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl fmt::Display for DecisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Analyzing => "ANALYZING",
            Self::Approved => "APPROVED",
            Self::UnderReview => "UNDER_REVIEW",
            Self::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTransition {
    /// State before.
    pub from: DecisionState,
    /// State after.
    pub to: DecisionState,
    /// When.
    pub at: DateTime<Utc>,
    /// Who caused it ("system" for automatic moves).
    pub actor: String,
}

/// The decision attached to one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Decision id (`dec_…`).
    pub id: String,
    /// Document this decision is for.
    pub document_id: String,
    /// Owner of that document.
    pub owner_id: String,
    /// Current state.
    pub state: DecisionState,
    /// Human-readable reason for the current state.
    pub reason: String,
    /// Report version the automatic decision was made on.
    pub report_version: Option<u32>,
    /// Overall score of that report.
    pub overall_score: Option<u8>,
    /// Set when a biometric duplicate forced review.
    pub duplicate_biometric: Option<BiometricMatch>,
    /// Reviewer who resolved the decision.
    pub reviewer_id: Option<String>,
    /// Reviewer comments.
    pub comments: Option<String>,
    /// Why the last analysis attempt produced no report.
    #[serde(default)]
    pub analysis_failure: Option<String>,
    /// Every transition, oldest first.
    pub history: Vec<DecisionTransition>,
    /// When the decision was opened.
    pub created_at: DateTime<Utc>,
    /// When the current state was entered.
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    fn new(document_id: &str, owner_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: format!("dec_{}", uuid::Uuid::new_v4().simple()),
            document_id: document_id.to_string(),
            owner_id: owner_id.to_string(),
            state: DecisionState::Pending,
            reason: "submitted".into(),
            report_version: None,
            overall_score: None,
            duplicate_biometric: None,
            reviewer_id: None,
            comments: None,
            analysis_failure: None,
            history: Vec::new(),
            created_at: now,
            decided_at: now,
        }
    }

    fn transition(
        &mut self,
        next: DecisionState,
        actor: &str,
        reason: String,
    ) -> Result<(), DocVerifyError> {
        if !self.state.can_transition_to(next) {
            error!(
                document_id = %self.document_id,
                current = %self.state,
                requested = %next,
                "DecisionEngine: invalid transition"
            );
            return Err(DocVerifyError::InvalidTransition {
                subject: self.document_id.clone(),
                current: self.state.to_string(),
                requested: next.to_string(),
            });
        }
        let now = Utc::now();
        self.history.push(DecisionTransition {
            from: self.state,
            to: next,
            at: now,
            actor: actor.to_string(),
        });
        self.state = next;
        self.reason = reason;
        self.decided_at = now;
        Ok(())
    }
}

/// Reviewer verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewAction {
    /// Approve the document.
    Approve,
    /// Reject the document. Requires comments.
    Reject,
}

/// A reviewer's resolution of an UNDER_REVIEW decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    /// Document under review.
    pub document_id: String,
    /// Verdict.
    pub action: ReviewAction,
    /// Reviewer comments.
    #[serde(default)]
    pub comments: Option<String>,
}

impl ReviewRequest {
    /// Comments with surrounding whitespace removed, if any remain.
    pub fn trimmed_comments(&self) -> Option<&str> {
        self.comments
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Reject a REJECT without comments.
    pub fn validate(&self) -> Result<(), DocVerifyError> {
        if self.document_id.trim().is_empty() {
            return Err(DocVerifyError::validation("documentId is required"));
        }
        if self.action == ReviewAction::Reject && self.trimmed_comments().is_none() {
            return Err(DocVerifyError::validation(
                "comments are required when rejecting",
            ));
        }
        Ok(())
    }
}

/// Map a recommendation plus an optional biometric match to a state.
///
/// A match at or above `match_threshold` wins over any score.
pub fn resolve(
    action: RecommendedAction,
    biometric_match: Option<&BiometricMatch>,
    match_threshold: f64,
) -> DecisionState {
    if biometric_match.is_some_and(|m| m.confidence >= match_threshold) {
        return DecisionState::UnderReview;
    }
    match action {
        RecommendedAction::Approve => DecisionState::Approved,
        RecommendedAction::Review => DecisionState::UnderReview,
        RecommendedAction::Reject => DecisionState::Rejected,
    }
}

/// Owns every decision and enforces the state machine.
pub struct DecisionEngine {
    decisions: RwLock<HashMap<String, Decision>>,
    match_threshold: f64,
}

impl DecisionEngine {
    /// Create an engine with the biometric match threshold in [0, 1].
    pub fn new(match_threshold: f64) -> Self {
        Self {
            decisions: RwLock::new(HashMap::new()),
            match_threshold,
        }
    }

    /// Open the decision for a document, or return the existing one.
    pub fn open(&self, document_id: &str, owner_id: &str) -> Result<Decision, DocVerifyError> {
        let mut decisions = self
            .decisions
            .write()
            .map_err(|_| DocVerifyError::poisoned("decision engine"))?;
        Ok(decisions
            .entry(document_id.to_string())
            .or_insert_with(|| Decision::new(document_id, owner_id))
            .clone())
    }

    /// PENDING -> ANALYZING.
    pub fn begin_analysis(&self, document_id: &str) -> Result<Decision, DocVerifyError> {
        self.with_decision(document_id, |d| {
            d.transition(DecisionState::Analyzing, "system", "analysis started".into())
        })
    }

    /// Record that analysis produced no report. The decision stays ANALYZING.
    pub fn record_analysis_failure(
        &self,
        document_id: &str,
        cause: &str,
    ) -> Result<Decision, DocVerifyError> {
        self.with_decision(document_id, |d| {
            if d.state != DecisionState::Analyzing {
                return Err(DocVerifyError::InvalidTransition {
                    subject: d.document_id.clone(),
                    current: d.state.to_string(),
                    requested: DecisionState::Analyzing.to_string(),
                });
            }
            warn!(document_id = %d.document_id, cause, "DecisionEngine: analysis failed, decision stays ANALYZING");
            d.analysis_failure = Some(cause.to_string());
            d.reason = format!("analysis failed: {cause}");
            Ok(())
        })
    }

    /// Take over an ANALYZING decision whose last analysis failed.
    ///
    /// Clears the failure so only one caller resumes. Fails for any
    /// decision without a recorded failure.
    pub fn resume_analysis(&self, document_id: &str) -> Result<Decision, DocVerifyError> {
        self.with_decision(document_id, |d| {
            if d.state != DecisionState::Analyzing || d.analysis_failure.is_none() {
                return Err(DocVerifyError::InvalidTransition {
                    subject: d.document_id.clone(),
                    current: d.state.to_string(),
                    requested: DecisionState::Analyzing.to_string(),
                });
            }
            d.analysis_failure = None;
            d.reason = "analysis resumed".into();
            Ok(())
        })
    }

    /// ANALYZING -> APPROVED | UNDER_REVIEW | REJECTED from a report.
    pub fn decide(
        &self,
        document_id: &str,
        report: &ForensicReport,
        biometric_match: Option<BiometricMatch>,
    ) -> Result<Decision, DocVerifyError> {
        let next = resolve(
            report.recommended_action,
            biometric_match.as_ref(),
            self.match_threshold,
        );
        let forced = next == DecisionState::UnderReview
            && report.recommended_action != RecommendedAction::Review;

        let reason = match (&biometric_match, forced) {
            (Some(m), true) => {
                warn!(
                    document_id,
                    overall_score = report.overall_score,
                    matched_owner = %m.matched_owner_id,
                    confidence = m.confidence,
                    "DecisionEngine: biometric duplicate overrides score"
                );
                format!(
                    "biometric duplicate of another owner's document (confidence {:.2})",
                    m.confidence
                )
            },
            _ => format!(
                "overall score {} recommends {:?}",
                report.overall_score, report.recommended_action
            ),
        };

        let decision = self.with_decision(document_id, |d| {
            d.transition(next, "system", reason)?;
            d.report_version = Some(report.version);
            d.overall_score = Some(report.overall_score);
            d.duplicate_biometric = biometric_match
                .filter(|m| m.confidence >= self.match_threshold);
            Ok(())
        })?;

        info!(
            document_id,
            state = %decision.state,
            overall_score = report.overall_score,
            "DecisionEngine: decided"
        );
        Ok(decision)
    }

    /// UNDER_REVIEW -> APPROVED | REJECTED by a reviewer.
    pub fn review(&self, reviewer: &Actor, request: &ReviewRequest) -> Result<Decision, DocVerifyError> {
        let reviewer_id = reviewer.authenticated()?;
        if reviewer.role != ActorRole::Reviewer {
            return Err(DocVerifyError::Forbidden {
                actor_id: reviewer_id.to_string(),
                action: "review documents",
            });
        }
        request.validate()?;

        let next = match request.action {
            ReviewAction::Approve => DecisionState::Approved,
            ReviewAction::Reject => DecisionState::Rejected,
        };
        let comments = request.trimmed_comments().map(str::to_string);

        let decision = self.with_decision(&request.document_id, |d| {
            if d.owner_id == reviewer_id {
                return Err(DocVerifyError::Forbidden {
                    actor_id: reviewer_id.to_string(),
                    action: "review their own document",
                });
            }
            if d.state != DecisionState::UnderReview {
                error!(
                    document_id = %d.document_id,
                    current = %d.state,
                    requested = %next,
                    "DecisionEngine: review outside UNDER_REVIEW"
                );
                return Err(DocVerifyError::InvalidTransition {
                    subject: d.document_id.clone(),
                    current: d.state.to_string(),
                    requested: next.to_string(),
                });
            }
            let reason = match &comments {
                Some(c) => format!("reviewer {reviewer_id}: {c}"),
                None => format!("reviewer {reviewer_id}"),
            };
            d.transition(next, reviewer_id, reason)?;
            d.reviewer_id = Some(reviewer_id.to_string());
            d.comments = comments.clone();
            Ok(())
        })?;

        info!(
            document_id = %request.document_id,
            reviewer = %reviewer_id,
            state = %decision.state,
            "DecisionEngine: review resolved"
        );
        Ok(decision)
    }

    /// Current decision for a document.
    pub fn get(&self, document_id: &str) -> Result<Decision, DocVerifyError> {
        self.decisions
            .read()
            .map_err(|_| DocVerifyError::poisoned("decision engine"))?
            .get(document_id)
            .cloned()
            .ok_or_else(|| DocVerifyError::not_found("decision", document_id))
    }

    /// Decisions waiting for a reviewer, oldest first.
    pub fn under_review(&self) -> Vec<Decision> {
        let Ok(decisions) = self.decisions.read() else {
            return Vec::new();
        };
        let mut queue: Vec<Decision> = decisions
            .values()
            .filter(|d| d.state == DecisionState::UnderReview)
            .cloned()
            .collect();
        queue.sort_by(|a, b| a.decided_at.cmp(&b.decided_at));
        queue
    }

    fn with_decision<F>(&self, document_id: &str, f: F) -> Result<Decision, DocVerifyError>
    where
        F: FnOnce(&mut Decision) -> Result<(), DocVerifyError>,
    {
        let mut decisions = self
            .decisions
            .write()
            .map_err(|_| DocVerifyError::poisoned("decision engine"))?;
        let stored = decisions
            .get_mut(document_id)
            .ok_or_else(|| DocVerifyError::not_found("decision", document_id))?;
        let mut draft = stored.clone();
        f(&mut draft)?;
        *stored = draft.clone();
        Ok(draft)
    }
}
