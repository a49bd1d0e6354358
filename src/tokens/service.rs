//! Token issuance and validation.
//!
//! Session, access and M2M tokens are EdDSA-signed JWTs carrying the signing
//! key id in the header; refresh tokens are opaque and backed by a refresh
//! session. Expiry and not-before are checked here against the injected
//! clock with the configured skew tolerance instead of inside `jsonwebtoken`.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Header, Validation};
use std::sync::Arc;
use tracing::{debug, field, info, instrument, warn};
use uuid::Uuid;

use super::claims::{Claims, RefreshPrincipal, ScopeSet, TokenClass, TokenPrincipal, ValidatedToken};
use super::policy::TokenPolicy;
use crate::clock::SharedClock;
use crate::crypto;
use crate::errors::{Error, Result};
use crate::keys::{KeyRotationService, SIGNING_ALGORITHM};
use crate::monitor::{SecurityEventKind, SecurityLog};
use crate::observability::metrics;
use crate::secrets::SecretString;
use crate::sessions::{ClientMetadata, IssuedRefresh, RefreshSessionStore, RefreshToken, SessionState};

/// A freshly minted token. The token text is a credential and stays wrapped.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub class: TokenClass,
    pub token: SecretString,
    pub token_id: String,
    pub scopes: ScopeSet,
    pub expires_at: DateTime<Utc>,
}

/// Tokens handed out at login.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub session_id: String,
    pub session: IssuedToken,
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Result of a refresh call; the refresh token is always a new one.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub session_id: String,
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Claims of a token about to be signed.
struct Grant<'a> {
    class: TokenClass,
    subject: &'a str,
    scopes: &'a ScopeSet,
    session_id: Option<&'a str>,
    auth_time: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

pub struct TokenService {
    keys: Arc<KeyRotationService>,
    sessions: Arc<RefreshSessionStore>,
    policy: TokenPolicy,
    clock: SharedClock,
    events: SecurityLog,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.policy.issuer)
            .field("audience", &self.policy.audience)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(
        keys: Arc<KeyRotationService>,
        sessions: Arc<RefreshSessionStore>,
        policy: TokenPolicy,
        clock: SharedClock,
        events: SecurityLog,
    ) -> Self {
        Self { keys, sessions, policy, clock, events }
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    pub fn sessions(&self) -> &Arc<RefreshSessionStore> {
        &self.sessions
    }

    /// Issue a token of `class` for `subject`.
    ///
    /// M2M tokens may only carry scopes from the configured allow-list.
    /// Refresh tokens start a new refresh session.
    #[instrument(skip(self, scopes), fields(class = %class, subject = %subject))]
    pub async fn issue(&self, class: TokenClass, subject: &str, scopes: &ScopeSet) -> Result<IssuedToken> {
        if subject.trim().is_empty() {
            return Err(Error::validation_field("subject cannot be empty", "subject"));
        }
        let now = self.clock.now();
        match class {
            TokenClass::Refresh => {
                let issued = self.sessions.create(subject, scopes.to_vec(), ClientMetadata::new()).await?;
                metrics::record_token_issued(class.as_str());
                Ok(refresh_token(issued, scopes.clone()))
            }
            TokenClass::M2m => {
                let denied = scopes.not_in(&self.policy.m2m_allowed_scopes);
                if !denied.is_empty() {
                    self.events.record_kind(
                        SecurityEventKind::AuthorizationDenied,
                        [("subject", subject.to_string()), ("denied_scopes", denied.join(" "))],
                    );
                    return Err(Error::validation_field(
                        format!("scopes not permitted for service tokens: {}", denied.join(" ")),
                        "scope",
                    ));
                }
                self.sign(Grant {
                    class,
                    subject,
                    scopes,
                    session_id: None,
                    auth_time: None,
                    expires_at: now + self.policy.m2m_ttl,
                })
            }
            TokenClass::Session => self.sign(Grant {
                class,
                subject,
                scopes,
                session_id: None,
                auth_time: Some(now),
                expires_at: now + self.policy.session_idle,
            }),
            TokenClass::Access => self.sign(Grant {
                class,
                subject,
                scopes,
                session_id: None,
                auth_time: None,
                expires_at: now + self.policy.access_ttl,
            }),
        }
    }

    /// Validate any token class.
    ///
    /// Signed tokens: the header `kid` selects the verification key among
    /// the current, staged and in-grace retired keys. An unknown `kid` is a
    /// signature failure. Refresh tokens are checked against their session
    /// without consuming them.
    #[instrument(skip(self, token), fields(class = field::Empty, kid = field::Empty))]
    pub async fn validate(&self, token: &str) -> Result<ValidatedToken> {
        let result = if token.starts_with("rt.") {
            self.validate_refresh(token).await
        } else {
            self.validate_signed(token)
        };
        match &result {
            Ok(validated) => {
                tracing::Span::current().record("class", validated.class().as_str());
                metrics::record_token_validation("valid");
            }
            Err(e) => {
                debug!(reason = e.kind(), "Token rejected");
                metrics::record_token_validation(e.kind());
            }
        }
        result
    }

    fn validate_signed(&self, token: &str) -> Result<ValidatedToken> {
        let header = decode_header(token).map_err(|e| Error::token_malformed(format!("header: {}", e)))?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(Error::signature_invalid(format!("unexpected algorithm {:?}", header.alg)));
        }
        let kid = header.kid.ok_or_else(|| Error::token_malformed("missing kid"))?;
        tracing::Span::current().record("kid", kid.as_str());

        let now = self.clock.now();
        let keys = self.keys.signing_keys();
        let key = keys
            .verification_key(&kid, now)
            .ok_or_else(|| Error::signature_invalid(format!("unknown or retired kid '{}'", kid)))?;

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_audience(&[self.policy.audience.as_str()]);
        validation.set_issuer(&[self.policy.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);

        let claims = decode::<Claims>(token, key.decoding_key(), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    Error::signature_invalid(e.to_string())
                }
                _ => Error::token_malformed(e.to_string()),
            })?
            .claims;

        self.check_times(&claims, now)?;
        let principal = principal(&claims)?;
        match claims.cls {
            TokenClass::Session => Ok(ValidatedToken::Session(principal)),
            TokenClass::Access => Ok(ValidatedToken::Access(principal)),
            TokenClass::M2m => Ok(ValidatedToken::M2m(principal)),
            TokenClass::Refresh => Err(Error::token_malformed("refresh tokens are never signed")),
        }
    }

    fn check_times(&self, claims: &Claims, now: DateTime<Utc>) -> Result<()> {
        let skew = self.policy.clock_skew.num_seconds();
        let now = now.timestamp();
        if now > claims.exp + skew {
            return Err(Error::TokenExpired);
        }
        if now + skew < claims.nbf {
            return Err(Error::token_malformed("token not yet valid"));
        }
        if claims.cls == TokenClass::Session {
            let auth_time = claims.auth_time.ok_or_else(|| Error::token_malformed("missing auth_time"))?;
            if now > auth_time + self.policy.session_max.num_seconds() + skew {
                return Err(Error::TokenExpired);
            }
        }
        Ok(())
    }

    async fn validate_refresh(&self, token: &str) -> Result<ValidatedToken> {
        let presented = RefreshToken::parse(token)?;
        let session = self
            .sessions
            .get(&presented.session_id)
            .await?
            .ok_or_else(|| Error::token_malformed("unknown refresh session"))?;
        match session.state(self.clock.now()) {
            SessionState::Revoked => {
                return Err(Error::session_revoked(session.revoke_reason.unwrap_or_else(|| "revoked".into())))
            }
            SessionState::Expired => return Err(Error::TokenExpired),
            SessionState::Active => {}
        }
        if !crypto::constant_time_eq(presented.rotation_hash().as_bytes(), session.rotation_hash.as_bytes()) {
            return Err(Error::signature_invalid("refresh token is not the current one"));
        }
        Ok(ValidatedToken::Refresh(RefreshPrincipal {
            session_id: session.session_id,
            user_id: session.user_id,
            scopes: ScopeSet::from_scopes(&session.scopes)?,
            expires_at: session.expires_at,
        }))
    }

    /// Login handoff: called by the external authentication collaborator
    /// once it has verified the user.
    #[instrument(skip(self, scopes, client_metadata), fields(user_id = %user_id))]
    pub async fn start_session(
        &self,
        user_id: &str,
        scopes: &ScopeSet,
        client_metadata: ClientMetadata,
    ) -> Result<SessionTokens> {
        let issued = self.sessions.create(user_id, scopes.to_vec(), client_metadata).await?;
        let session_id = issued.session.session_id.clone();
        let now = self.clock.now();

        let session = self.sign(Grant {
            class: TokenClass::Session,
            subject: user_id,
            scopes,
            session_id: Some(&session_id),
            auth_time: Some(now),
            expires_at: now + self.policy.session_idle,
        })?;
        let access = self.access_for_session(user_id, scopes, &session_id, now)?;
        metrics::record_token_issued(TokenClass::Refresh.as_str());

        info!(session_id = %session_id, "Session started");
        Ok(SessionTokens { session_id, session, access, refresh: refresh_token(issued, scopes.clone()) })
    }

    /// Exchange a refresh token for a new access token and a new refresh
    /// token. Reuse of a consumed refresh token revokes the session.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let issued = self.sessions.rotate(refresh_token).await?;
        let scopes = ScopeSet::from_scopes(&issued.session.scopes)?;
        let session_id = issued.session.session_id.clone();
        let access =
            self.access_for_session(&issued.session.user_id, &scopes, &session_id, self.clock.now())?;
        metrics::record_token_issued(TokenClass::Refresh.as_str());
        Ok(TokenPair { session_id, access, refresh: self::refresh_token(issued, scopes) })
    }

    /// Idempotent; succeeds for tokens that are already invalid.
    pub async fn logout(&self, refresh_token: &str) -> Result<()> {
        self.sessions.logout(refresh_token).await
    }

    /// Slide a session token's idle window forward, never past the absolute
    /// lifetime counted from login. Passing `new_scopes` re-issues the
    /// session with the changed privileges. Every renewal gets a new token id.
    #[instrument(skip(self, session_token, new_scopes))]
    pub async fn renew_session(&self, session_token: &str, new_scopes: Option<&ScopeSet>) -> Result<IssuedToken> {
        let ValidatedToken::Session(current) = self.validate(session_token).await? else {
            return Err(Error::token_malformed("not a session token"));
        };
        let now = self.clock.now();
        let auth_time = current.auth_time.ok_or_else(|| Error::token_malformed("missing auth_time"))?;
        let hard_limit = auth_time + self.policy.session_max;
        if now >= hard_limit {
            return Err(Error::TokenExpired);
        }

        let scopes = new_scopes.unwrap_or(&current.scopes);
        if scopes != &current.scopes {
            info!(subject = %current.subject, "Session privileges changed; token re-issued");
        }
        self.sign(Grant {
            class: TokenClass::Session,
            subject: &current.subject,
            scopes,
            session_id: current.session_id.as_deref(),
            auth_time: Some(auth_time),
            expires_at: (now + self.policy.session_idle).min(hard_limit),
        })
    }

    fn access_for_session(
        &self,
        subject: &str,
        scopes: &ScopeSet,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        self.sign(Grant {
            class: TokenClass::Access,
            subject,
            scopes,
            session_id: Some(session_id),
            auth_time: None,
            expires_at: now + self.policy.access_ttl,
        })
    }

    fn sign(&self, grant: Grant<'_>) -> Result<IssuedToken> {
        let now = self.clock.now();
        let keys = self.keys.signing_keys();
        let key = keys.current();

        let token_id = Uuid::new_v4().to_string();
        let claims = Claims {
            iss: self.policy.issuer.clone(),
            aud: self.policy.audience.clone(),
            sub: grant.subject.to_string(),
            exp: grant.expires_at.timestamp(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: token_id.clone(),
            cls: grant.class,
            scope: grant.scopes.to_claim(),
            sid: grant.session_id.map(str::to_string),
            auth_time: grant.auth_time.map(|t| t.timestamp()),
        };

        let mut header = Header::new(SIGNING_ALGORITHM);
        header.kid = Some(key.kid.clone());
        let token = encode(&header, &claims, key.encoding_key()).map_err(|e| {
            warn!(error = %e, kid = %key.kid, "Token signing failed");
            Error::internal(format!("token signing failed: {}", e))
        })?;

        metrics::record_token_issued(grant.class.as_str());
        Ok(IssuedToken {
            class: grant.class,
            token: SecretString::new(token),
            token_id,
            scopes: grant.scopes.clone(),
            expires_at: grant.expires_at,
        })
    }
}

fn refresh_token(issued: IssuedRefresh, scopes: ScopeSet) -> IssuedToken {
    IssuedToken {
        class: TokenClass::Refresh,
        token: issued.token.to_secret_string(),
        token_id: issued.session.session_id,
        scopes,
        expires_at: issued.session.expires_at,
    }
}

fn principal(claims: &Claims) -> Result<TokenPrincipal> {
    Ok(TokenPrincipal {
        subject: claims.sub.clone(),
        scopes: ScopeSet::parse(&claims.scope)?,
        token_id: claims.jti.clone(),
        session_id: claims.sid.clone(),
        issued_at: timestamp(claims.iat)?,
        expires_at: timestamp(claims.exp)?,
        auth_time: claims.auth_time.map(timestamp).transpose()?,
    })
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single().ok_or_else(|| Error::token_malformed("timestamp out of range"))
}
