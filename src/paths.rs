//! Location derivation for a single invocation.
//!
//! Everything the job touches is a function of the job arguments, the
//! layout prefixes and the run date, and is computed once up front.

use chrono::{NaiveDate, Utc};
use object_store::path::Path;
use snafu::prelude::*;
use std::fmt;

use crate::config::{JobArgs, LayoutConfig};
use crate::error::{
    ConfigError, InvalidKeySnafu, MissingDatasetFolderSnafu, OutsideRawPrefixSnafu,
};

/// The UTC calendar date of "now".
pub fn utc_run_date() -> NaiveDate {
    Utc::now().date_naive()
}

/// The dataset folder of a source key: its second path segment.
///
/// `raw/orders/2024.csv` yields `orders`. Returns `None` when the key has no
/// second segment or it is empty.
pub fn dataset_folder(key: &str) -> Option<&str> {
    key.split('/').nth(1).filter(|folder| !folder.is_empty())
}

/// Fully qualified table name, `<catalog>.<database>.<table>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableAddress {
    pub catalog: String,
    pub namespace: String,
    pub table: String,
}

impl fmt::Display for TableAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.namespace, self.table)
    }
}

/// Every location one invocation reads from or writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub bucket: String,
    pub folder: String,
    pub run_date: NaiveDate,
    /// Source object, relative to the bucket.
    pub raw_key: Path,
    /// Archive destination, relative to the bucket.
    pub archive_key: Path,
    /// Quarantine artifact, relative to the bucket.
    pub quarantine_key: Path,
    /// Table location, `s3://<bucket>/<processed>/<folder>`.
    pub processed_location: String,
    pub table: TableAddress,
}

impl JobPaths {
    /// Derive all locations for `args`.
    ///
    /// The key must live under the raw prefix and carry a dataset folder;
    /// otherwise the archive destination could not be told apart from the
    /// source and the copy-then-delete would lose the object. Keys are taken
    /// verbatim, so characters such as `#` or spaces address the object
    /// that carries them rather than a percent-encoded twin.
    pub fn derive(
        args: &JobArgs,
        layout: &LayoutConfig,
        catalog: &str,
        run_date: NaiveDate,
    ) -> Result<Self, ConfigError> {
        let key = args.key.trim_start_matches('/');
        let folder = dataset_folder(key)
            .context(MissingDatasetFolderSnafu { key: key.to_string() })?
            .to_string();

        let raw_root = format!("{}/", layout.raw_prefix);
        let remainder = key.strip_prefix(&raw_root).context(OutsideRawPrefixSnafu {
            key: key.to_string(),
            prefix: layout.raw_prefix.clone(),
        })?;

        let raw_key = object_path(key)?;
        let archive_key = object_path(&format!("{}/{}", layout.archive_prefix, remainder))?;
        let quarantine_key = object_path(&format!(
            "{}/{}/bad_{}.parquet",
            layout.quarantine_prefix,
            folder,
            run_date.format("%Y-%m-%d")
        ))?;
        let processed_location = format!(
            "s3://{}/{}/{}",
            args.bucket, layout.processed_prefix, folder
        );

        Ok(Self {
            bucket: args.bucket.clone(),
            table: TableAddress {
                catalog: catalog.to_string(),
                namespace: args.database.clone(),
                table: folder.clone(),
            },
            folder,
            run_date,
            raw_key,
            archive_key,
            quarantine_key,
            processed_location,
        })
    }

    pub fn raw_uri(&self) -> String {
        self.uri(&self.raw_key)
    }

    pub fn archive_uri(&self) -> String {
        self.uri(&self.archive_key)
    }

    pub fn quarantine_uri(&self) -> String {
        self.uri(&self.quarantine_key)
    }

    fn uri(&self, key: &Path) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

fn object_path(key: &str) -> Result<Path, ConfigError> {
    Path::parse(key).context(InvalidKeySnafu { key })
}
