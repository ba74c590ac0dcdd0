use std::ffi::OsString;
use std::fmt;

use uuid::Uuid;

use crate::error::{ElectionError, Result};

/// Identity of one running candidate.
///
/// Generated identities look like `<hostname>_<uuid>` so that several
/// instances on the same host remain distinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build an identity from the local hostname and a random suffix.
    pub fn generate() -> Result<Self> {
        let host = resolve_hostname()?;
        Ok(Self::for_host(&host))
    }

    pub fn for_host(host: &str) -> Self {
        Self(format!("{}_{}", host, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Identity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

fn resolve_hostname() -> Result<String> {
    hostname_from(gethostname::gethostname())
}

fn hostname_from(raw: OsString) -> Result<String> {
    let host = raw.into_string().map_err(|raw| {
        ElectionError::Identity(format!("hostname {:?} is not valid UTF-8", raw))
    })?;

    let host = host.trim();
    if host.is_empty() {
        return Err(ElectionError::Identity(
            "error fetching hostname: empty".to_string(),
        ));
    }
    Ok(host.to_string())
}
