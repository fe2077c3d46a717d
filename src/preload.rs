// In: src/preload.rs

//! Cheap enumeration of candidate input files.
//!
//! Only paths are inspected, never file contents. Anything that merely looks like
//! data (manifests, partial warehouses, editor droppings) is filtered here, because
//! a parser handed such a file would fail the whole unit.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::BloarkError;
use crate::warehouse::format::WAREHOUSE_EXTENSION;

/// Which kind of data file a preload scan is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadKind {
    /// Raw dumps for the Builder.
    Sources,
    /// Finalized warehouses for the Modifier.
    Warehouses,
}

impl PreloadKind {
    fn extensions(self) -> &'static [&'static str] {
        match self {
            PreloadKind::Sources => &["xml", "bz2", "gz", "zst"],
            PreloadKind::Warehouses => &[WAREHOUSE_EXTENSION],
        }
    }
}

/// Sidecar extensions that are never data, whatever else the name says.
const SIDECAR_EXTENSIONS: &[&str] = &["partial", "metadata", "tmp", "lock", "json", "log"];
const SYSTEM_FILES: &[&str] = &["thumbs.db", "desktop.ini"];

/// Enumerates data files under `path` (a file or a directory), sorted and de-duplicated.
pub fn preload(path: impl AsRef<Path>, kind: PreloadKind) -> Result<Vec<PathBuf>, BloarkError> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(BloarkError::InvalidConfig("preload path cannot be empty".into()));
    }
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("preload path does not exist: {}", path.display()),
        )
        .into());
    }

    let mut found = BTreeSet::new();
    if path.is_file() {
        if is_candidate(path, kind) {
            found.insert(path.to_path_buf());
        } else {
            log::warn!("Skipping non-data file {}", path.display());
        }
    } else {
        for entry in WalkDir::new(path)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    log::warn!("Skipping unreadable entry during preload: {}", err);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
        {
            if is_candidate(entry.path(), kind) {
                found.insert(entry.into_path());
            }
        }
    }

    log::info!("Preloaded {} files from {}", found.len(), path.display());
    Ok(found.into_iter().collect())
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map_or(false, |n| n.starts_with('.'))
}

/// True if `path` names a data file of the requested kind.
pub fn is_candidate(path: &Path, kind: PreloadKind) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n.to_ascii_lowercase(),
        None => return false,
    };
    if name.starts_with('.') || SYSTEM_FILES.contains(&name.as_str()) {
        return false;
    }
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext,
        None => return false,
    };
    if SIDECAR_EXTENSIONS.contains(&ext) {
        return false;
    }
    kind.extensions().contains(&ext)
}
