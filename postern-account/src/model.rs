//! Rows the core reads from the account datastore.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Domain {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub verified_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Domain {
    /// Verified and not soft-deleted.
    pub const fn is_usable(&self) -> bool {
        self.verified_at.is_some() && self.deleted_at.is_none()
    }
}

/// A forwarding rule matched against the local part of a recipient.
///
/// The rule is compiled on the first match attempt and kept for as long as the alias
/// itself is alive, which in practice is the lifetime of the cached alias set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
    pub id: i64,
    pub account_id: i64,
    pub domain_id: i64,
    pub rule: String,
    #[serde(skip)]
    compiled: OnceLock<Option<Regex>>,
}

impl PartialEq for Alias {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.account_id == other.account_id
            && self.domain_id == other.domain_id
            && self.rule == other.rule
    }
}

impl Eq for Alias {}

impl Alias {
    pub fn new(id: i64, account_id: i64, domain_id: i64, rule: impl Into<String>) -> Self {
        Self {
            id,
            account_id,
            domain_id,
            rule: rule.into(),
            compiled: OnceLock::new(),
        }
    }

    /// The anchored, lower-cased pattern this rule compiles to.
    pub fn pattern(&self) -> String {
        let rule = self.rule.to_lowercase();
        let rule = rule.trim_start_matches('^').trim_end_matches('$');
        format!("^{rule}$")
    }

    /// A rule that fails to compile never matches.
    pub fn matches(&self, local: &str) -> bool {
        self.compiled
            .get_or_init(|| match Regex::new(&self.pattern()) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    tracing::warn!(alias = self.id, rule = %self.rule, "Alias rule does not compile: {err}");
                    None
                }
            })
            .as_ref()
            .is_some_and(|regex| regex.is_match(local))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Destination {
    pub id: i64,
    pub account_id: i64,
    pub address: String,
}

/// Maps a forwarded envelope back to whoever originally sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnPath {
    pub id: Ulid,
    pub account_id: i64,
    pub alias_id: i64,
    pub return_to: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub log_level: i16,
}

#[cfg(test)]
mod tests {
    use super::Alias;

    #[test]
    fn rules_are_anchored() {
        let alias = Alias::new(1, 1, 1, "^User$");
        assert_eq!(alias.pattern(), "^user$");
        assert!(alias.matches("user"));
        assert!(!alias.matches("superuser"));

        let bare = Alias::new(2, 1, 1, "sales.*");
        assert_eq!(bare.pattern(), "^sales.*$");
        assert!(bare.matches("sales-eu"));
    }

    #[test]
    fn broken_rules_never_match() {
        let alias = Alias::new(1, 1, 1, "(unclosed");
        assert!(!alias.matches("unclosed"));
        assert!(!alias.matches("(unclosed"));
    }
}
