//! The blacklist collaborator contract consumed from the DNS daemon:
//! `IsInBlacklist(name-or-ip) -> bool`, a pure lookup that must not block
//! for more than a few ms.
//!
//! The real blacklist lives in the DNS daemon, out of scope for this
//! crate; `StaticBlacklist` below exists only so tests and the `sockd`
//! binary (until wired to a real collaborator) have something to construct.

use std::collections::HashSet;
use std::sync::Arc;

/// Pure, non-blocking lookup: is `name_or_ip` blacklisted?
pub trait Blacklist: Send + Sync {
    fn is_in_blacklist(&self, name_or_ip: &str) -> bool;
}

/// Always answers "not blacklisted", a placeholder collaborator for
/// deployments that haven't wired in a real DNS daemon yet.
pub struct NoopBlacklist;

impl Blacklist for NoopBlacklist {
    #[inline]
    fn is_in_blacklist(&self, _name_or_ip: &str) -> bool {
        false
    }
}

/// A fixed in-memory blacklist, useful for tests and for
/// small deployments that would rather ship a static list than run a full
/// DNS daemon.
pub struct StaticBlacklist {
    entries: HashSet<String>,
}

impl StaticBlacklist {
    pub fn new(entries: impl IntoIterator<Item = String>) -> StaticBlacklist {
        StaticBlacklist {
            entries: entries.into_iter().collect(),
        }
    }
}

impl Blacklist for StaticBlacklist {
    #[inline]
    fn is_in_blacklist(&self, name_or_ip: &str) -> bool {
        self.entries.contains(name_or_ip)
    }
}

/// Convenience alias for the shared-ownership form every sub-daemon holds.
pub type SharedBlacklist = Arc<dyn Blacklist>;
