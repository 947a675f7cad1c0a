use core::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address '{0}' must contain exactly one '@'")]
    Malformed(String),

    #[error("address '{0}' has an empty local part or domain")]
    Incomplete(String),
}

/// A lower-cased `local@domain` mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress {
    local: String,
    domain: String,
}

impl EmailAddress {
    /// Normalise and split an address.
    ///
    /// # Errors
    /// [`AddressError::Malformed`] unless the address contains exactly one `@`,
    /// [`AddressError::Incomplete`] if either side of it is empty.
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let normalised = address.trim().to_lowercase();

        let mut parts = normalised.split('@');
        let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AddressError::Malformed(address.to_string()));
        };

        if local.is_empty() || domain.is_empty() {
            return Err(AddressError::Incomplete(address.to_string()));
        }

        Ok(Self {
            local: local.to_string(),
            domain: domain.to_string(),
        })
    }

    #[inline]
    pub fn local(&self) -> &str {
        &self.local
    }

    #[inline]
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl Display for EmailAddress {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}@{}", self.local, self.domain)
    }
}

impl FromStr for EmailAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{AddressError, EmailAddress};

    #[test]
    fn parse_normalises_case() {
        let address = EmailAddress::parse(" User@Example.COM ").unwrap();
        assert_eq!(address.local(), "user");
        assert_eq!(address.domain(), "example.com");
        assert_eq!(address.to_string(), "user@example.com");
    }

    #[test]
    fn at_sign_count() {
        assert!(matches!(
            EmailAddress::parse("user.example.com"),
            Err(AddressError::Malformed(_))
        ));
        assert!(matches!(
            EmailAddress::parse("a@b@example.com"),
            Err(AddressError::Malformed(_))
        ));
        assert!(matches!(
            EmailAddress::parse("@example.com"),
            Err(AddressError::Incomplete(_))
        ));
    }
}
