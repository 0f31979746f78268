//! FTP user credentials.
//!
//! The credential file holds one `username:password` pair per line. It is
//! loaded once at startup into an immutable [`Credentials`] value which is
//! then handed to whatever authenticates sessions.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::Context;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::errors::DriverError;

/// Immutable username -> password mapping.
#[derive(Clone)]
pub struct Credentials {
    entries: HashMap<String, String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut users: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        users.sort_unstable();
        f.debug_struct("Credentials").field("users", &users).finish()
    }
}

impl Credentials {
    /// Parse credentials from the contents of a credential file.
    ///
    /// Lines are trimmed; blank lines and lines without a `:` are skipped.
    /// The first `:` separates username from password, so passwords may
    /// contain colons.
    pub fn load_from_text(contents: &str) -> Result<Self, DriverError> {
        let entries: HashMap<String, String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(user, pass)| (user.to_string(), pass.to_string()))
            .collect();

        if entries.is_empty() {
            return Err(DriverError::NoCredentialsFound);
        }
        debug!(users = entries.len(), "Loaded FTP credentials");
        Ok(Self { entries })
    }

    /// Read and parse the credential file at `path`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::load_from_text(&contents)?)
    }

    /// Whether `username` exists and `password` matches it exactly.
    pub fn check_password(&self, username: &str, password: &str) -> bool {
        match self.entries.get(username) {
            Some(expected) => constant_time_eq(expected, password),
            None => false,
        }
    }

    /// Like [`check_password`](Self::check_password) but yields an
    /// `AuthenticationFailed` error for a non-matching pair.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<(), DriverError> {
        if self.check_password(username, password) {
            Ok(())
        } else {
            warn!(user = %username, "Authentication failed");
            Err(DriverError::AuthenticationFailed {
                username: username.to_string(),
            })
        }
    }

    /// Number of configured users.
    pub fn user_count(&self) -> usize {
        self.entries.len()
    }
}

/// Compare two secrets in constant time.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// -- Tests --------------------------------------------------------------------
