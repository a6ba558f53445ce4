//! Server coverage identification: partitioning instances into groups
//! that share a physical server.
//!
//! Two settings are supported:
//! - `targeted`: every instance has its own URL, so the lock instance can
//!   be chosen; candidates are reverified with a second round.
//! - `shared`: all instances sit behind one public URL, so the lock
//!   instance is whoever happened to handle the `/lock` request.
pub mod shared;
pub mod targeted;

pub use self::shared::{discover_instances, SharedUrlIdentifier};
pub use self::targeted::CoverageIdentifier;

use std::collections::HashSet;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// A lock instance and the instances verified to share its server.
///
/// `members` always contains `lock_url` itself, first. In the shared-URL
/// setting both fields hold instance ids rather than URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerGroup {
    pub lock_url: String,
    pub members: Vec<String>,
}

impl ServerGroup {
    pub fn singleton(lock: &str) -> ServerGroup {
        ServerGroup {
            lock_url: lock.to_string(),
            members: vec![lock.to_string()],
        }
    }
}

/// Returns true if every instance appears in exactly one group, and the
/// groups contain nothing else.
pub fn covers_exactly(groups: &[ServerGroup], instances: &[String]) -> bool {
    let expected = instances.iter().collect::<HashSet<_>>();
    let mut seen = HashSet::new();
    for member in groups.iter().flat_map(|g| g.members.iter()) {
        if !expected.contains(member) || !seen.insert(member) {
            return false;
        }
    }
    seen.len() == expected.len()
}

/// Removes duplicates, keeping first occurrences.
pub(crate) fn unique_in_order(items: &[String]) -> Vec<String> {
    items.iter().unique().cloned().collect()
}
