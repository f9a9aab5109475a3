//! Job run handle.
//!
//! A [`JobRun`] is created once per invocation (`init`), driven through the
//! states of the ingestion state machine, and finally committed. Transitions
//! outside the machine are rejected.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::emit;
use crate::error::{InvalidTransitionSnafu, PipelineError};
use crate::metrics::events::JobFinished;

/// States of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Bootstrapped,
    Read,
    WriteSucceeded,
    WriteFailed,
    Archived,
    Quarantined,
    Committed,
    Terminated,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Bootstrapped => "bootstrapped",
            JobState::Read => "read",
            JobState::WriteSucceeded => "write_succeeded",
            JobState::WriteFailed => "write_failed",
            JobState::Archived => "archived",
            JobState::Quarantined => "quarantined",
            JobState::Committed => "committed",
            JobState::Terminated => "terminated",
        }
    }

    /// Whether the machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Bootstrapped, Read)
                | (Read, WriteSucceeded)
                | (Read, WriteFailed)
                | (WriteSucceeded, Archived)
                | (Archived, Committed)
                | (WriteFailed, Quarantined)
                | (WriteFailed, Terminated)
                | (Quarantined, Terminated)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Committed | JobState::Terminated)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle for a single invocation of the job.
#[derive(Debug)]
pub struct JobRun {
    name: String,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    state: JobState,
}

impl JobRun {
    /// Start a run. Run ids are time-ordered.
    pub fn init(name: impl Into<String>) -> Self {
        let run = Self {
            name: name.into(),
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
            started: Instant::now(),
            state: JobState::Bootstrapped,
        };
        info!(job = %run.name, run_id = %run.run_id, "Job initialized");
        run
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`, rejecting transitions the machine does not allow.
    pub fn transition(&mut self, next: JobState) -> Result<(), PipelineError> {
        snafu::ensure!(
            self.state.can_transition_to(next),
            InvalidTransitionSnafu {
                from: self.state,
                to: next,
            }
        );
        debug!(from = %self.state, to = %next, "Job state transition");
        self.state = next;
        Ok(())
    }

    /// Signal successful completion of the run.
    pub fn commit(&mut self) -> Result<(), PipelineError> {
        self.transition(JobState::Committed)?;
        emit!(JobFinished {
            state: self.state,
            duration: self.started.elapsed(),
        });
        info!(job = %self.name, run_id = %self.run_id, "Job committed");
        Ok(())
    }

    /// Record that the run ended without committing.
    pub fn terminate(&mut self) -> Result<(), PipelineError> {
        self.transition(JobState::Terminated)?;
        emit!(JobFinished {
            state: self.state,
            duration: self.started.elapsed(),
        });
        Ok(())
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_path() {
        let mut run = JobRun::init("ingest-orders");
        assert_eq!(run.state(), JobState::Bootstrapped);

        run.transition(JobState::Read).unwrap();
        run.transition(JobState::WriteSucceeded).unwrap();
        run.transition(JobState::Archived).unwrap();
        run.commit().unwrap();

        assert_eq!(run.state(), JobState::Committed);
        assert!(run.state().is_terminal());
    }

    #[test]
    fn test_failure_path() {
        let mut run = JobRun::init("ingest-orders");
        run.transition(JobState::Read).unwrap();
        run.transition(JobState::WriteFailed).unwrap();
        run.transition(JobState::Quarantined).unwrap();
        run.terminate().unwrap();

        assert_eq!(run.state(), JobState::Terminated);
    }

    #[test]
    fn test_archive_requires_successful_write() {
        let mut run = JobRun::init("ingest-orders");
        run.transition(JobState::Read).unwrap();
        run.transition(JobState::WriteFailed).unwrap();

        let err = run.transition(JobState::Archived).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition {
                from: JobState::WriteFailed,
                to: JobState::Archived
            }
        ));
        assert_eq!(run.state(), JobState::WriteFailed);
    }

    #[test]
    fn test_commit_requires_archive() {
        let mut run = JobRun::init("ingest-orders");
        run.transition(JobState::Read).unwrap();
        run.transition(JobState::WriteSucceeded).unwrap();
        assert!(run.commit().is_err());
    }

    #[test]
    fn test_run_ids_are_unique() {
        let a = JobRun::init("a");
        let b = JobRun::init("b");
        assert_ne!(a.run_id(), b.run_id());
        assert_eq!(a.name(), "a");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(JobState::WriteSucceeded.to_string(), "write_succeeded");
        assert_eq!(JobState::Quarantined.to_string(), "quarantined");
    }
}
