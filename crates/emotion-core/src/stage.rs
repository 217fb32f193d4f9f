//! Pipeline stage machine.
//!
//! ```text
//! pending -> processing -> submitted -> registered -> analyzing -> aggregating -> completed
//!                 |                                      |             |
//!                 +-> cancelled                          +-> no_data <-+
//! any non-terminal stage -> error
//! ```
//!
//! The status ledger stores the current stage as its snake_case string.
//! When the ledger has lost a record, [`PipelineStage::from_history`]
//! rebuilds the stage from the durable queue rows of the submission.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::{Job, JobStatus, JobType};

/// Result field a stage handler sets to report a terminal non-error outcome.
pub const OUTCOME_KEY: &str = "outcome";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Accepted, intake not yet started
    Pending,
    /// Intake running
    Processing,
    /// Intake passed, registration queued
    Submitted,
    /// Duplicate submission; nothing was stored
    Cancelled,
    /// Snapshots committed, classification queued
    Registered,
    /// Classification running
    Analyzing,
    /// Labels committed, aggregation queued or running
    Aggregating,
    /// Verdict stored
    Completed,
    /// Nothing left to classify or aggregate
    NoData,
    /// A stage failed; see the error message
    Error,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Pending => "pending",
            PipelineStage::Processing => "processing",
            PipelineStage::Submitted => "submitted",
            PipelineStage::Cancelled => "cancelled",
            PipelineStage::Registered => "registered",
            PipelineStage::Analyzing => "analyzing",
            PipelineStage::Aggregating => "aggregating",
            PipelineStage::Completed => "completed",
            PipelineStage::NoData => "no_data",
            PipelineStage::Error => "error",
        }
    }

    /// Whether no further stage will run for this submission.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Cancelled
                | PipelineStage::Completed
                | PipelineStage::NoData
                | PipelineStage::Error
        )
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Re-recording the current stage is allowed so that a retried stage
    /// job can write its status again.
    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;

        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if next == Error {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Submitted)
                | (Processing, Cancelled)
                | (Submitted, Registered)
                | (Registered, Analyzing)
                | (Analyzing, Aggregating)
                | (Analyzing, NoData)
                | (Aggregating, Completed)
                | (Aggregating, NoData)
        )
    }

    /// Rebuild the stage of a submission from its queue rows.
    ///
    /// Returns `None` when there are no rows.
    pub fn from_history(jobs: &[Job]) -> Option<PipelineStage> {
        let latest = jobs.iter().max_by_key(|j| {
            let order = JobType::ALL
                .iter()
                .position(|jt| *jt == j.job_type)
                .unwrap_or(0);
            (order, j.created_at)
        })?;

        let outcome = latest
            .result
            .as_ref()
            .and_then(|r| r.get(OUTCOME_KEY))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<PipelineStage>().ok());

        let stage = match (latest.job_type, latest.status) {
            (_, JobStatus::Failed) => PipelineStage::Error,
            (JobType::Intake, JobStatus::Pending) => PipelineStage::Pending,
            (JobType::Intake, JobStatus::Running) => PipelineStage::Processing,
            (JobType::Intake, JobStatus::Completed) => {
                outcome.unwrap_or(PipelineStage::Submitted)
            }
            (JobType::Registration, JobStatus::Completed) => PipelineStage::Registered,
            (JobType::Registration, _) => PipelineStage::Submitted,
            (JobType::Classification, JobStatus::Pending) => PipelineStage::Registered,
            (JobType::Classification, JobStatus::Running) => PipelineStage::Analyzing,
            (JobType::Classification, JobStatus::Completed) => {
                outcome.unwrap_or(PipelineStage::Aggregating)
            }
            (JobType::Aggregation, JobStatus::Completed) => {
                outcome.unwrap_or(PipelineStage::Completed)
            }
            (JobType::Aggregation, _) => PipelineStage::Aggregating,
        };
        Some(stage)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use PipelineStage::*;

        [
            Pending,
            Processing,
            Submitted,
            Cancelled,
            Registered,
            Analyzing,
            Aggregating,
            Completed,
            NoData,
            Error,
        ]
        .into_iter()
        .find(|stage| stage.as_str() == s)
        .ok_or_else(|| crate::Error::InvalidInput(format!("unknown pipeline stage: {}", s)))
    }
}
