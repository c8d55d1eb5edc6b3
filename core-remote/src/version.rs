//! Protocol versions and feature gates.
//!
//! The server reports its protocol version in every response envelope. The
//! latest value is kept in [`ServerVersion`] so features can be refused
//! locally before a request is sent. An unknown version never blocks.

use crate::error::{RemoteError, Result};
use parking_lot::RwLock;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            patch: 0,
        }
    }

    /// Same or newer major/minor; patch level is ignored.
    pub fn is_at_least(&self, required: ProtocolVersion) -> bool {
        (self.major, self.minor) >= (required.major, required.minor)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ProtocolVersion {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || RemoteError::InvalidResponse(format!("bad protocol version '{}'", s));
        let mut parts = s.trim().split('.');
        let major = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let minor = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let patch = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

/// Minimum server versions of gated features.
pub mod features {
    use super::ProtocolVersion;

    pub const JUKEBOX: ProtocolVersion = ProtocolVersion::new(1, 7);
    pub const ARTISTS: ProtocolVersion = ProtocolVersion::new(1, 8);
    pub const AVATAR: ProtocolVersion = ProtocolVersion::new(1, 8);
}

/// Last protocol version reported by the server.
#[derive(Debug, Default)]
pub struct ServerVersion {
    current: RwLock<Option<ProtocolVersion>>,
}

impl ServerVersion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<ProtocolVersion> {
        *self.current.read()
    }

    pub fn set(&self, version: ProtocolVersion) {
        *self.current.write() = Some(version);
    }

    /// Record the version string from a response envelope. Garbage is ignored.
    pub fn observe(&self, reported: &str) {
        if let Ok(version) = reported.parse() {
            let mut current = self.current.write();
            if *current != Some(version) {
                tracing::debug!(%version, "Server protocol version");
                *current = Some(version);
            }
        }
    }

    /// `true` unless the server is known to be older than `required`.
    pub fn supports(&self, required: ProtocolVersion) -> bool {
        self.get().map_or(true, |v| v.is_at_least(required))
    }

    pub fn require(&self, feature: &str, required: ProtocolVersion) -> Result<()> {
        match self.get() {
            Some(actual) if !actual.is_at_least(required) => Err(RemoteError::UnsupportedVersion {
                feature: feature.to_string(),
                required,
                actual,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_and_three_part_versions() {
        assert_eq!("1.7".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::new(1, 7));
        let v: ProtocolVersion = "1.16.1".parse().unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 16, 1));
        assert!("1".parse::<ProtocolVersion>().is_err());
        assert!("1.x".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn minor_versions_compare_numerically() {
        let v: ProtocolVersion = "1.10.0".parse().unwrap();
        assert!(v.is_at_least(features::JUKEBOX));
        assert!(!ProtocolVersion::new(1, 6).is_at_least(features::JUKEBOX));
    }

    #[test]
    fn unknown_version_passes_gates() {
        let server = ServerVersion::new();
        assert!(server.supports(features::AVATAR));
        assert!(server.require("jukebox", features::JUKEBOX).is_ok());

        server.observe("1.6.0");
        assert!(!server.supports(features::JUKEBOX));
        let err = server.require("jukebox", features::JUKEBOX).unwrap_err();
        assert!(matches!(err, RemoteError::UnsupportedVersion { .. }));

        server.observe("not a version");
        assert_eq!(server.get(), Some(ProtocolVersion::new(1, 6)));
    }
}
