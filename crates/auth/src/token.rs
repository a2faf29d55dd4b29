//! Single-use, time-bounded credential tokens.
//!
//! Bearer value handed to clients: `base64("<principalId>:<secret>")` with the
//! standard padded alphabet. Reset and invitation links depend on this exact
//! format.
//!
//! ```text
//! Active ──redeem──► Redeemed   (terminal)
//!   │
//!   └──expires_at < now──► Expired (terminal, detected at validation time)
//! ```

use std::sync::Arc;

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatehouse_core::{Entity, PrincipalId, TenantId, TokenId};

use crate::policy::{EntityAccessPolicy, Protected, RequiredPrivilege};
use crate::privilege::builtin;
use crate::resolver::ResolvedAuthority;
use crate::store::{StoreError, TokenStore};
use crate::Privilege;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    PasswordReset,
    Invitation,
    MagicLink,
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct CredentialToken {
    pub id: TokenId,
    pub principal_id: PrincipalId,
    /// Bearer secret, compared verbatim.
    #[serde(skip_serializing)]
    pub secret: String,
    pub kind: TokenKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Monotonic: never goes back to `false`.
    pub used: bool,
}

impl CredentialToken {
    /// Steps 3–5 of validation for a token that was found in storage.
    ///
    /// A token that is both used and expired reports `AlreadyUsed`.
    pub fn classify(&self, now: DateTime<Utc>) -> TokenOutcome {
        if self.used {
            TokenOutcome::AlreadyUsed
        } else if self.expires_at < now {
            TokenOutcome::Expired
        } else {
            TokenOutcome::Valid
        }
    }

    /// Bearer value for this token.
    pub fn bearer(&self) -> String {
        encode_bearer(self.principal_id, &self.secret)
    }
}

impl core::fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialToken")
            .field("id", &self.id)
            .field("principal_id", &self.principal_id)
            .field("secret", &"<redacted>")
            .field("kind", &self.kind)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("used", &self.used)
            .finish()
    }
}

impl Entity for CredentialToken {
    type Id = TokenId;

    fn id(&self) -> TokenId {
        self.id
    }
}

impl Protected for CredentialToken {
    const ENTITY_TYPE: &'static str = "credential_token";

    fn access_policy() -> EntityAccessPolicy {
        EntityAccessPolicy::new(
            Self::ENTITY_TYPE,
            RequiredPrivilege::Privilege(builtin::CAN_READ_BACKEND),
            RequiredPrivilege::Privilege(builtin::CAN_MANAGE_BACKEND),
        )
    }

    fn scope_tenant(&self) -> Option<TenantId> {
        None
    }
}

/// Input for a token row (the store assigns the id and `used = false`).
#[derive(Clone, PartialEq, Eq)]
pub struct NewToken {
    pub principal_id: PrincipalId,
    pub secret: String,
    pub kind: TokenKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of validating a presented bearer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenOutcome {
    Valid,
    /// Malformed, unparseable or unknown. Deliberately indistinguishable.
    Invalid,
    AlreadyUsed,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenValidation {
    /// Present for every outcome except `Invalid`.
    pub token: Option<CredentialToken>,
    pub outcome: TokenOutcome,
}

impl TokenValidation {
    fn invalid() -> Self {
        Self {
            token: None,
            outcome: TokenOutcome::Invalid,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.outcome == TokenOutcome::Valid
    }
}

/// A freshly issued token together with the bearer value to hand out.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: CredentialToken,
    pub bearer: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token {0} was already used")]
    AlreadyUsed(TokenId),

    #[error("token {0} not found")]
    NotFound(TokenId),

    #[error("forbidden: issuing tokens for other principals requires '{0}'")]
    Forbidden(Privilege),

    #[error("{kind:?} token lifetime overflows the calendar from {issued_at}")]
    ExpiryOutOfRange {
        kind: TokenKind,
        issued_at: DateTime<Utc>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lifetimes and secret size for issued tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPolicy {
    pub password_reset_ttl: Duration,
    pub invitation_ttl: Duration,
    pub magic_link_ttl: Duration,
    /// Random bytes per secret before encoding.
    pub secret_bytes: usize,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            password_reset_ttl: Duration::minutes(60),
            invitation_ttl: Duration::hours(168),
            magic_link_ttl: Duration::minutes(15),
            secret_bytes: 32,
        }
    }
}

impl TokenPolicy {
    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::PasswordReset => self.password_reset_ttl,
            TokenKind::Invitation => self.invitation_ttl,
            TokenKind::MagicLink => self.magic_link_ttl,
        }
    }
}

pub fn encode_bearer(principal_id: PrincipalId, secret: &str) -> String {
    STANDARD.encode(format!("{principal_id}:{secret}"))
}

/// Structural decode of a bearer value into `(principal, secret)`.
///
/// Splits at the first `:`; the principal part must be numeric.
pub fn decode_bearer(bearer: &str) -> Option<(PrincipalId, String)> {
    let bytes = STANDARD.decode(bearer.trim()).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let (principal, secret) = text.split_once(':')?;
    let principal_id = principal.parse::<PrincipalId>().ok()?;
    Some((principal_id, secret.to_string()))
}

fn generate_secret(size: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = vec![0u8; size];
    rng.fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug)]
pub struct TokenService<S> {
    store: Arc<S>,
    policy: TokenPolicy,
}

impl<S> TokenService<S>
where
    S: TokenStore,
{
    pub fn new(store: Arc<S>, policy: TokenPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Issue a token for `principal_id` (self-service flows, invitations sent
    /// by the system).
    pub fn issue(
        &self,
        principal_id: PrincipalId,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = now
            .checked_add_signed(self.policy.ttl(kind))
            .ok_or(TokenError::ExpiryOutOfRange { kind, issued_at: now })?;

        let token = self.store.insert_token(NewToken {
            principal_id,
            secret: generate_secret(self.policy.secret_bytes),
            kind,
            created_at: now,
            expires_at,
        })?;

        tracing::info!(
            token_id = %token.id,
            principal_id = %principal_id,
            ?kind,
            expires_at = %token.expires_at,
            "credential token issued"
        );

        let bearer = token.bearer();
        Ok(IssuedToken { token, bearer })
    }

    /// Issue a token on behalf of another principal (administrator reset).
    pub fn issue_on_behalf(
        &self,
        requester: &ResolvedAuthority,
        principal_id: PrincipalId,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        if requester.principal_id != principal_id && !requester.has_global(&builtin::CAN_RESET_PASSWORD) {
            tracing::warn!(
                requester = %requester.principal_id,
                principal_id = %principal_id,
                "token issue on behalf denied"
            );
            return Err(TokenError::Forbidden(builtin::CAN_RESET_PASSWORD));
        }
        self.issue(principal_id, kind, now)
    }

    /// Decode → lookup → classify. Never mutates the token.
    pub fn validate(&self, bearer: &str, now: DateTime<Utc>) -> Result<TokenValidation, StoreError> {
        let Some((principal_id, secret)) = decode_bearer(bearer) else {
            tracing::debug!("bearer value failed structural decode");
            return Ok(TokenValidation::invalid());
        };

        let Some(token) = self.store.find_token(principal_id, &secret)? else {
            tracing::debug!(principal_id = %principal_id, "no token matches bearer value");
            return Ok(TokenValidation::invalid());
        };

        let outcome = token.classify(now);
        if outcome != TokenOutcome::Valid {
            tracing::warn!(token_id = %token.id, ?outcome, "credential token rejected");
        }

        Ok(TokenValidation {
            token: Some(token),
            outcome,
        })
    }

    /// Mark a validated token as used.
    ///
    /// Compare-and-swap on the `used` flag: losing a race reports
    /// `AlreadyUsed`, so a token is redeemed at most once.
    pub fn redeem(&self, token: &CredentialToken) -> Result<(), TokenError> {
        match self.store.mark_used(token.id) {
            Ok(true) => {
                tracing::info!(token_id = %token.id, principal_id = %token.principal_id, "credential token redeemed");
                Ok(())
            }
            Ok(false) => Err(TokenError::AlreadyUsed(token.id)),
            Err(StoreError::NotFound(_)) => Err(TokenError::NotFound(token.id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Validate and redeem in one step.
    ///
    /// Of any number of concurrent calls with the same bearer value, exactly
    /// one observes `Valid`; the others observe `AlreadyUsed`.
    pub fn consume(&self, bearer: &str, now: DateTime<Utc>) -> Result<TokenValidation, TokenError> {
        let mut validation = self.validate(bearer, now)?;
        if !validation.is_valid() {
            return Ok(validation);
        }

        let Some(token) = validation.token.as_mut() else {
            return Ok(validation);
        };

        match self.redeem(token) {
            Ok(()) => {
                token.used = true;
            }
            Err(TokenError::AlreadyUsed(_)) => {
                token.used = true;
                validation.outcome = TokenOutcome::AlreadyUsed;
            }
            Err(err) => return Err(err),
        }
        Ok(validation)
    }
}
