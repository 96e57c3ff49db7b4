//! Canonical queue-bucket identifier.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one workload's queue bucket: `{namespace}/{service}`.
///
/// Two requests routed to the same target share a `HostKey` and
/// therefore share a concurrency counter. The key is stable for the
/// process lifetime and is what the admin surface reports counts under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostKey(String);

impl HostKey {
    pub fn new(namespace: &str, service: &str) -> Self {
        Self(format!("{namespace}/{service}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
