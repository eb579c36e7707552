//! Bearer credentials and the provider seam.
//!
//! The session never stores a credential beyond one connection attempt. Each
//! attempt asks the [`TokenProvider`] again, so a refreshed token is picked
//! up on the next reconnect and an expired one stops the session instead of
//! being replayed.

use std::{fmt, rc::Rc};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Opaque bearer token.
///
/// `Debug` output is redacted so credentials cannot leak through logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for building the connection target only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Expiry from the `exp` claim, if the token is a JWT that carries one.
    ///
    /// Signatures are not verified; the server does that. Anything that does
    /// not decode as a JWT payload yields `None`.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        #[derive(Deserialize)]
        struct Claims {
            exp: Option<i64>,
        }

        let mut segments = self.0.split('.');
        let (Some(_header), Some(payload), Some(_signature)) =
            (segments.next(), segments.next(), segments.next())
        else {
            return None;
        };

        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        let claims: Claims = serde_json::from_slice(&bytes).ok()?;
        DateTime::from_timestamp(claims.exp?, 0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"[REDACTED]").finish()
    }
}

/// Source of the current credential.
pub trait TokenProvider {
    /// Current credential, or `None` if the user is not signed in.
    fn token(&self) -> Option<Credential>;

    /// Whether `credential` must no longer be presented.
    fn is_expired(&self, credential: &Credential) -> bool;
}

impl<T: TokenProvider + ?Sized> TokenProvider for Rc<T> {
    fn token(&self) -> Option<Credential> {
        (**self).token()
    }

    fn is_expired(&self, credential: &Credential) -> bool {
        (**self).is_expired(credential)
    }
}

/// Provider holding a fixed token.
///
/// Expiry is judged from the JWT `exp` claim against the wall clock. Tokens
/// that are not JWTs, or carry no `exp`, never expire.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    credential: Option<Credential>,
}

impl StaticTokenProvider {
    /// Provider that always returns `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self { credential: Some(Credential::new(token)) }
    }

    /// Provider with no credential.
    pub fn signed_out() -> Self {
        Self { credential: None }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self) -> Option<Credential> {
        self.credential.clone()
    }

    fn is_expired(&self, credential: &Credential) -> bool {
        credential.expires_at().is_some_and(|exp| exp <= Utc::now())
    }
}
