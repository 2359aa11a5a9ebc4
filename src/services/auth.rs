use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::error::{AppError, Result};
use crate::models::Claims;

/// Verification of bearer tokens issued by the identity provider
pub struct AuthService;

impl AuthService {
    /// Validate an HS256 access token and extract claims
    pub fn validate_token(token: &str, secret: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!("Rejected token: {}", e);
            AppError::Unauthorized("Invalid token".to_string())
        })?;

        if token_data.claims.sub.trim().is_empty() {
            return Err(AppError::Unauthorized("Invalid token".to_string()));
        }

        Ok(token_data.claims)
    }

    /// Pull the token out of an `Authorization: Bearer …` header value
    pub fn bearer_token(header: Option<&str>) -> Result<&str> {
        match header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(token) if !token.trim().is_empty() => Ok(token.trim()),
            _ => Err(AppError::Unauthorized(
                "Missing or invalid Authorization header".to_string(),
            )),
        }
    }
}
