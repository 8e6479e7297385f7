//! Sign-in gate.
//!
//! The identity provider's token is only decoded here, never verified: this
//! decides which screen to show, it does not protect data.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid identity token")]
    InvalidToken,

    #[error("{0} is not on the access list")]
    NotAuthorized(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

/// Reads the email and name out of a JWT payload.
pub fn decode_credential(token: &str) -> Result<User, AuthError> {
    let mut segments = token.trim().split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_header), Some(payload), Some(_signature)) => payload,
        _ => return Err(AuthError::InvalidToken),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| AuthError::InvalidToken)?;
    let user: User = serde_json::from_slice(&bytes).map_err(|_| AuthError::InvalidToken)?;

    if user.email.trim().is_empty() {
        return Err(AuthError::InvalidToken);
    }
    Ok(user)
}

/// Decodes `token` and checks its email against `allowed` (lowercased).
pub fn authorize(token: &str, allowed: &[String]) -> Result<User, AuthError> {
    let user = decode_credential(token)?;
    let email = user.email.trim().to_lowercase();

    if allowed.iter().any(|a| *a == email) {
        tracing::info!(email = %email, "user signed in");
        Ok(user)
    } else {
        tracing::warn!(email = %email, "sign-in denied");
        Err(AuthError::NotAuthorized(user.email))
    }
}
