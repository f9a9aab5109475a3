//! Named job arguments.

use clap::Args;
use snafu::prelude::*;

use crate::error::{ConfigError, EmptyArgumentSnafu};

/// The four named arguments every invocation must carry.
///
/// Flag names follow the orchestrator's conventions, so `--JOB_NAME` and
/// `--glue_database_name` keep their original spelling.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct JobArgs {
    /// Job name reported on init and commit.
    #[arg(long = "JOB_NAME", value_name = "NAME")]
    pub job_name: String,

    /// Bucket holding raw, archive and quarantine objects.
    #[arg(long)]
    pub bucket: String,

    /// Source object key, e.g. raw/<folder>/<file>.csv
    #[arg(long)]
    pub key: String,

    /// Destination catalog database.
    #[arg(long = "glue_database_name", value_name = "DATABASE")]
    pub database: String,
}

impl JobArgs {
    pub fn new(
        job_name: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            bucket: bucket.into(),
            key: key.into(),
            database: database.into(),
        }
    }

    /// Reject empty values; clap already enforces presence.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            !self.job_name.trim().is_empty(),
            EmptyArgumentSnafu { name: "JOB_NAME" }
        );
        ensure!(
            !self.bucket.trim().is_empty(),
            EmptyArgumentSnafu { name: "bucket" }
        );
        ensure!(!self.key.trim().is_empty(), EmptyArgumentSnafu { name: "key" });
        ensure!(
            !self.database.trim().is_empty(),
            EmptyArgumentSnafu {
                name: "glue_database_name"
            }
        );
        Ok(())
    }
}
