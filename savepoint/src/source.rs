//! Identity of a file being protected by versioned backups.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::utils::{Result, SavepointError};

pub const LOCAL_METHOD: &str = "local";
pub const LOCAL_HOST: &str = "localhost";

/// Where a remote source lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    /// Access method, e.g. `ssh`
    pub method: String,
    pub host: String,
    pub user: String,
}

/// A file to back up.
///
/// `local_path` is the path as seen on the machine that owns the file, so for
/// remote sources it is a path on the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceFile {
    local_path: String,
    remote: Option<RemoteDescriptor>,
}

impl SourceFile {
    pub fn local(path: impl AsRef<Path>) -> Self {
        Self {
            local_path: path.as_ref().to_string_lossy().into_owned(),
            remote: None,
        }
    }

    pub fn remote(remote: RemoteDescriptor, path: impl Into<String>) -> Self {
        Self {
            local_path: path.into(),
            remote: Some(remote),
        }
    }

    /// Parse either a plain path or a remote source `method:user@host:/path`.
    ///
    /// Absolute paths, drive-letter paths and anything without a `:` are
    /// treated as local.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(SavepointError::InvalidSource("empty path".into()));
        }
        if value.starts_with('/') || has_drive_letter(value) || !value.contains(':') {
            return Ok(SourceFile::local(value));
        }

        let mut parts = value.splitn(3, ':');
        let (method, user_host, path) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(uh), Some(p)) if !m.is_empty() && !p.is_empty() => (m, uh, p),
            _ => {
                return Err(SavepointError::InvalidSource(format!(
                    "'{}' is not of the form method:user@host:/path",
                    value
                )))
            }
        };
        if !method.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(SavepointError::InvalidSource(format!(
                "invalid access method '{}'",
                method
            )));
        }

        let (user, host) = match user_host.rsplit_once('@') {
            Some((user, host)) if !user.is_empty() && !host.is_empty() => (user, host),
            _ => {
                return Err(SavepointError::InvalidSource(format!(
                    "'{}' must name both user and host as user@host",
                    user_host
                )))
            }
        };

        Ok(SourceFile::remote(
            RemoteDescriptor {
                method: method.to_string(),
                host: host.to_string(),
                user: user.to_string(),
            },
            path,
        ))
    }

    pub fn local_path(&self) -> &str {
        &self.local_path
    }

    pub fn remote_descriptor(&self) -> Option<&RemoteDescriptor> {
        self.remote.as_ref()
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// `(method, host, user)`, substituting the local defaults when the
    /// source has no remote descriptor
    pub fn identity<'a>(&'a self, current_user: &'a str) -> (&'a str, &'a str, &'a str) {
        match &self.remote {
            Some(r) => (&r.method, &r.host, &r.user),
            None => (LOCAL_METHOD, LOCAL_HOST, current_user),
        }
    }
}

impl fmt::Display for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.remote {
            Some(r) => write!(f, "{}:{}@{}:{}", r.method, r.user, r.host, self.local_path),
            None => f.write_str(&self.local_path),
        }
    }
}

/// `C:/...` or `c:\...`
pub(crate) fn has_drive_letter(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'/' || bytes[2] == b'\\')
}

/// Name of the user running this process
pub fn current_user() -> String {
    #[cfg(unix)]
    {
        let uid = nix::unistd::getuid();
        if let Ok(Some(user)) = nix::unistd::User::from_uid(uid) {
            return user.name;
        }
    }

    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
