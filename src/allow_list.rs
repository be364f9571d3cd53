//! Authorized sender addresses.
//!
//! The allow-list is a JSON file with a single key:
//!
//! ```json
//! { "AUTHORIZED_CLIENTS": ["owner@example.com", "Manager@Example.com "] }
//! ```
//!
//! Entries are trimmed and lower-cased; duplicates collapse. The file is
//! re-read on every check cycle, so edits take effect without a restart.

use crate::error::{Error, Result};
use email_address::EmailAddress;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, instrument, warn};

#[derive(Deserialize)]
struct AllowListFile {
    #[serde(rename = "AUTHORIZED_CLIENTS", default)]
    authorized_clients: Vec<String>,
}

/// A set of normalized sender addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    senders: HashSet<String>,
}

impl AllowList {
    /// Creates an empty allow-list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `address` is allowed. The argument is normalized
    /// before lookup.
    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.senders.contains(&normalize(address))
    }

    /// Number of distinct addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Returns `true` if no sender is authorized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Iterates the normalized addresses in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.senders.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for AllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            senders: iter
                .into_iter()
                .map(|s| normalize(s.as_ref()))
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Reads the allow-list file.
///
/// A file without the `AUTHORIZED_CLIENTS` key yields an empty list. Entries
/// that are not valid addresses are kept (they simply never match a real
/// sender) and logged.
///
/// # Errors
///
/// Returns [`Error::ConfigFileMissing`] if the file does not exist,
/// [`Error::ConfigFileRead`] if it cannot be read and
/// [`Error::ConfigFileMalformed`] if it is not the expected JSON shape.
#[instrument(name = "allow_list::load", skip_all, fields(path = %path.display()))]
pub fn load_allowed_senders(path: &Path) -> Result<AllowList> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::ConfigFileMissing {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(Error::ConfigFileRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let file: AllowListFile =
        serde_json::from_str(&content).map_err(|source| Error::ConfigFileMalformed {
            path: path.to_path_buf(),
            source,
        })?;

    for entry in &file.authorized_clients {
        let entry = normalize(entry);
        if !entry.is_empty()
            && EmailAddress::parse_with_options(&entry, email_address::Options::default()).is_err()
        {
            warn!(entry = %entry, "Allow-list entry is not a valid email address");
        }
    }

    let allow_list: AllowList = file.authorized_clients.iter().collect();
    debug!(count = allow_list.len(), "Loaded allow-list");
    Ok(allow_list)
}
