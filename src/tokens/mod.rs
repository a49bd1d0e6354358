//! # Tokens
//!
//! Issuance and validation of session, access, refresh and M2M tokens.
//! Signed classes use the current key from the key rotation service;
//! refresh tokens are opaque handles onto refresh sessions.

pub mod claims;
pub mod policy;
pub mod service;

pub use claims::{Claims, RefreshPrincipal, ScopeSet, TokenClass, TokenPrincipal, ValidatedToken};
pub use policy::TokenPolicy;
pub use service::{IssuedToken, SessionTokens, TokenPair, TokenService};
