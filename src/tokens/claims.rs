//! Token classes, JWT claims and scope sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenClass {
    /// Cookie-oriented browser session
    Session,
    /// Short-lived API credential
    Access,
    /// Opaque single-use refresh token
    Refresh,
    /// Service identity
    M2m,
}

impl TokenClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenClass::Session => "session",
            TokenClass::Access => "access",
            TokenClass::Refresh => "refresh",
            TokenClass::M2m => "m2m",
        }
    }
}

impl Display for TokenClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "session" => Ok(TokenClass::Session),
            "access" => Ok(TokenClass::Access),
            "refresh" => Ok(TokenClass::Refresh),
            "m2m" => Ok(TokenClass::M2m),
            other => Err(Error::validation_field(format!("unknown token class '{}'", other), "class")),
        }
    }
}

/// Set of scopes, carried in tokens as a space-delimited `scope` claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a space-delimited scope string. Scopes are lowercase ASCII
    /// letters, digits and `.`, `_`, `-`, `:`.
    pub fn parse(raw: &str) -> Result<Self> {
        raw.split_whitespace().map(Self::validate_scope).collect::<Result<BTreeSet<_>>>().map(Self)
    }

    pub fn from_scopes<I, S>(scopes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        scopes
            .into_iter()
            .map(|s| Self::validate_scope(s.as_ref().trim()))
            .collect::<Result<BTreeSet<_>>>()
            .map(Self)
    }

    fn validate_scope(scope: &str) -> Result<String> {
        let valid = !scope.is_empty()
            && scope.len() <= 64
            && scope.bytes().all(|b| {
                b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-' | b':')
            });
        if valid {
            Ok(scope.to_string())
        } else {
            Err(Error::validation_field(format!("invalid scope '{}'", scope), "scope"))
        }
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn is_subset(&self, other: &ScopeSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Scopes in `self` that `allowed` does not grant.
    pub fn not_in(&self, allowed: &ScopeSet) -> Vec<String> {
        self.0.difference(&allowed.0).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_claim(&self) -> String {
        self.iter().collect::<Vec<_>>().join(" ")
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

/// Registered and private claims of every signed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: String,
    pub cls: TokenClass,
    #[serde(default)]
    pub scope: String,
    /// Refresh session this token was minted from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Login time of a browser session, bounds session renewal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
}

/// Identity and grants extracted from a validated signed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPrincipal {
    pub subject: String,
    pub scopes: ScopeSet,
    pub token_id: String,
    pub session_id: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub auth_time: Option<DateTime<Utc>>,
}

/// Validated refresh token. Validation does not consume it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPrincipal {
    pub session_id: String,
    pub user_id: String,
    pub scopes: ScopeSet,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class", rename_all = "lowercase")]
pub enum ValidatedToken {
    Session(TokenPrincipal),
    Access(TokenPrincipal),
    Refresh(RefreshPrincipal),
    M2m(TokenPrincipal),
}

impl ValidatedToken {
    pub fn class(&self) -> TokenClass {
        match self {
            ValidatedToken::Session(_) => TokenClass::Session,
            ValidatedToken::Access(_) => TokenClass::Access,
            ValidatedToken::Refresh(_) => TokenClass::Refresh,
            ValidatedToken::M2m(_) => TokenClass::M2m,
        }
    }

    pub fn subject(&self) -> &str {
        match self {
            ValidatedToken::Session(p) | ValidatedToken::Access(p) | ValidatedToken::M2m(p) => &p.subject,
            ValidatedToken::Refresh(p) => &p.user_id,
        }
    }

    pub fn scopes(&self) -> &ScopeSet {
        match self {
            ValidatedToken::Session(p) | ValidatedToken::Access(p) | ValidatedToken::M2m(p) => &p.scopes,
            ValidatedToken::Refresh(p) => &p.scopes,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        match self {
            ValidatedToken::Session(p) | ValidatedToken::Access(p) | ValidatedToken::M2m(p) => p.expires_at,
            ValidatedToken::Refresh(p) => p.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scope_parse() {
        let scopes = ScopeSet::parse("  keys.read admin.write keys.read ").unwrap();
        assert_eq!(scopes.len(), 2);
        assert!(scopes.contains("admin.write"));
        assert_eq!(scopes.to_claim(), "admin.write keys.read");
        assert!(ScopeSet::parse("").unwrap().is_empty());
        assert!(ScopeSet::parse("Admin").is_err());
        assert!(ScopeSet::parse("a;b").is_err());
    }

    #[test]
    fn test_scope_subset() {
        let allowed = ScopeSet::parse("keys.read admin.monitor").unwrap();
        let wanted = ScopeSet::parse("keys.read admin.write").unwrap();
        assert!(!wanted.is_subset(&allowed));
        assert_eq!(wanted.not_in(&allowed), vec!["admin.write".to_string()]);
    }

    #[test]
    fn test_class_claim_serialization() {
        assert_eq!(serde_json::to_string(&TokenClass::M2m).unwrap(), "\"m2m\"");
        assert_eq!("session".parse::<TokenClass>().unwrap(), TokenClass::Session);
    }

    proptest! {
        #[test]
        fn scope_claim_reparses_to_same_set(scopes in proptest::collection::btree_set("[a-z][a-z0-9._:-]{0,20}", 0..8)) {
            let set = ScopeSet::from_scopes(&scopes).unwrap();
            let reparsed = ScopeSet::parse(&set.to_claim()).unwrap();
            prop_assert_eq!(reparsed, set);
        }

        #[test]
        fn scope_parse_never_panics(raw in ".{0,200}") {
            let _ = ScopeSet::parse(&raw);
        }
    }
}
