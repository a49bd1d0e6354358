//! Lifetimes, audience and scope rules applied when issuing tokens.

use chrono::Duration;

use super::claims::{ScopeSet, TokenClass};
use crate::config::TokenConfig;
use crate::errors::Result;

#[derive(Debug, Clone)]
pub struct TokenPolicy {
    pub issuer: String,
    pub audience: String,
    /// Sliding inactivity window of a browser session
    pub session_idle: Duration,
    /// Absolute cap on a browser session, counted from login
    pub session_max: Duration,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub m2m_ttl: Duration,
    pub clock_skew: Duration,
    pub m2m_allowed_scopes: ScopeSet,
}

impl TokenPolicy {
    pub fn from_config(config: &TokenConfig) -> Result<Self> {
        Ok(Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            session_idle: config.session_idle(),
            session_max: config.session_max(),
            access_ttl: config.access_ttl(),
            refresh_ttl: config.refresh_ttl(),
            m2m_ttl: config.m2m_ttl(),
            clock_skew: config.clock_skew(),
            m2m_allowed_scopes: ScopeSet::from_scopes(&config.m2m_allowed_scopes)?,
        })
    }

    /// Lifetime a freshly issued token of `class` gets.
    pub fn ttl(&self, class: TokenClass) -> Duration {
        match class {
            TokenClass::Session => self.session_idle,
            TokenClass::Access => self.access_ttl,
            TokenClass::Refresh => self.refresh_ttl,
            TokenClass::M2m => self.m2m_ttl,
        }
    }
}
