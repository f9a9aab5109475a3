//! Move of a processed raw object into the archive prefix.

use object_store::path::Path;
use snafu::prelude::*;
use tracing::info;

use crate::emit;
use crate::error::{ArchiveCopySnafu, ArchiveDeleteSnafu, ArchiveError};
use crate::metrics::events::ObjectArchived;
use crate::storage::StorageProvider;

/// Copy `from` to `to`, then delete `from`.
///
/// The delete is only attempted once the copy has completed. If the delete
/// fails the object exists at both locations.
pub async fn archive_object(
    storage: &StorageProvider,
    from: &Path,
    to: &Path,
) -> Result<(), ArchiveError> {
    storage.copy(from, to).await.context(ArchiveCopySnafu {
        from: from.to_string(),
        to: to.to_string(),
    })?;

    storage.delete(from).await.context(ArchiveDeleteSnafu {
        path: from.to_string(),
    })?;

    emit!(ObjectArchived);
    info!("Archived raw file {} to {}", from, to);
    Ok(())
}
