//! Username normalization

use std::borrow::Borrow;
use std::fmt;

use super::error::{RegistryError, RegistryResult};

/// A normalized live-stream username
///
/// Surrounding whitespace and one leading `@` are removed. Case is kept as
/// given, so `Alice` and `alice` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Username(String);

impl Username {
    /// Normalize raw client input
    pub fn parse(raw: &str) -> RegistryResult<Self> {
        let trimmed = raw.trim();
        let name = trimmed.strip_prefix('@').unwrap_or(trimmed).trim();
        if name.is_empty() {
            return Err(RegistryError::InvalidInput);
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Username {
    fn borrow(&self) -> &str {
        &self.0
    }
}
