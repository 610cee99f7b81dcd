//! Catalog vs. remote reconciliation.
//!
//! Pure set arithmetic: what the remote has that the catalog lacks, and the
//! reverse. Acting on the result (placeholders, removals) is the caller's job.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Result of comparing catalog ids against remote ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Remote ids unknown to the catalog
    pub to_add: BTreeSet<String>,
    /// Catalog ids no longer present remotely
    pub to_remove: BTreeSet<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// What happens to items that disappeared from the remote playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    /// Leave record and file alone
    #[default]
    Keep,
    /// Drop the record and blacklist the id so it is never fetched again
    Blacklist,
    /// Drop the record and delete its media file
    Delete,
}

impl RemovalPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Blacklist => "blacklist",
            Self::Delete => "delete",
        }
    }
}

impl std::str::FromStr for RemovalPolicy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "blacklist" => Ok(Self::Blacklist),
            "delete" => Ok(Self::Delete),
            other => Err(crate::error::Error::validation(format!(
                "unknown removal policy '{other}'"
            ))),
        }
    }
}

/// `to_add = remote - existing`, `to_remove = existing - remote`.
pub fn diff(existing: &BTreeSet<String>, remote: &BTreeSet<String>) -> Diff {
    Diff {
        to_add: remote.difference(existing).cloned().collect(),
        to_remove: existing.difference(remote).cloned().collect(),
    }
}

/// Drop blacklisted ids from a remote id set before diffing.
pub fn without_blacklisted(remote: BTreeSet<String>, blacklist: &BTreeSet<String>) -> BTreeSet<String> {
    if blacklist.is_empty() {
        return remote;
    }
    remote
        .into_iter()
        .filter(|id| !blacklist.contains(id))
        .collect()
}
