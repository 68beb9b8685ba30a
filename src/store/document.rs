/// Flat-file JSON document helpers shared by the aggregation services
///
/// Reads tolerate a missing, empty, or corrupt file by falling back to a
/// default document; a corrupt file is preserved as a timestamped backup
/// before it is ever overwritten. Writes rewrite the full document and
/// flush synchronously before returning.
use crate::error::{OverlayError, Result};
use crate::events::now_millis;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

/// Load a document, falling back to `default` when the file is missing,
/// empty, or corrupt. Corrupt content is copied aside first.
pub fn read_or_default<T, F>(path: &Path, default: F) -> T
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return default(),
        Err(e) => {
            error!("Error reading document {}: {}", path.display(), e);
            return default();
        }
    };

    if raw.trim().is_empty() {
        return default();
    }

    match serde_json::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Corrupt document {}: {}", path.display(), e);
            backup_corrupt(path);
            default()
        }
    }
}

/// Copy a corrupt document to `<path>.corrupted.<millis>` so the data is
/// not lost when the file is rewritten
fn backup_corrupt(path: &Path) {
    let backup = path.with_extension(format!("corrupted.{}", now_millis()));
    match fs::copy(path, &backup) {
        Ok(_) => info!("Corrupt document backed up to {}", backup.display()),
        Err(e) => error!("Failed to back up corrupt document: {}", e),
    }
}

/// Write the full document back to disk, creating parent directories as
/// needed. Flushes before returning.
pub fn write<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(document)?;
    fs::write(path, json).map_err(|e| {
        OverlayError::Document(format!("write {} failed: {}", path.display(), e))
    })
}
