use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Claim structure for the JWT tokens this service verifies. Tokens are
/// issued by the identity service; this module only validates them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Authenticated user data extracted from the JWT token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
}

impl AuthConfig {
    pub fn new(jwt_secret: String, jwt_issuer: String, jwt_audience: String) -> Self {
        Self {
            jwt_secret,
            jwt_issuer,
            jwt_audience,
        }
    }
}

/// Verifier injected into request extensions by the auth middleware.
#[derive(Clone)]
pub struct AuthVerifier {
    config: AuthConfig,
}

impl AuthVerifier {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Validate a bearer token and return its claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.config.jwt_issuer]);
        validation.set_audience(&[&self.config.jwt_audience]);

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        Ok(data.claims)
    }

    /// Mint a short-lived token. Production tokens come from the identity
    /// service; this exists for local tooling and the test harness.
    pub fn issue_token(
        &self,
        user_id: Uuid,
        name: Option<String>,
        email: Option<String>,
        ttl_secs: i64,
    ) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            name,
            email,
            iat: now,
            exp: now + ttl_secs,
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::InternalError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing authentication")]
    MissingAuth,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("malformed subject claim")]
    MalformedSubject,
    #[error("internal auth error: {0}")]
    InternalError(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthError::MissingAuth => (
                StatusCode::UNAUTHORIZED,
                "AUTH_MISSING",
                "Missing authentication".to_string(),
            ),
            AuthError::InvalidToken(msg) => {
                (StatusCode::UNAUTHORIZED, "AUTH_INVALID_TOKEN", msg.clone())
            }
            AuthError::MalformedSubject => (
                StatusCode::UNAUTHORIZED,
                "AUTH_MALFORMED_SUBJECT",
                "Malformed subject claim".to_string(),
            ),
            AuthError::InternalError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AUTH_INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        let body = Json(serde_json::json!({
            "error": { "code": code, "message": message }
        }));

        (status, body).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let verifier = parts
            .extensions
            .get::<Arc<AuthVerifier>>()
            .cloned()
            .ok_or_else(|| {
                AuthError::InternalError("auth verifier missing from request extensions".into())
            })?;

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingAuth)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or(AuthError::MissingAuth)?;

        let claims = verifier.validate_token(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::MalformedSubject)?;

        Ok(AuthUser {
            user_id,
            name: claims.name,
            email: claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> AuthVerifier {
        AuthVerifier::new(AuthConfig::new(
            "test_secret_key_for_testing_purposes_only_32chars".into(),
            "vitrine".into(),
            "vitrine-storefront".into(),
        ))
    }

    #[test]
    fn issued_tokens_round_trip() {
        let v = verifier();
        let user_id = Uuid::new_v4();
        let token = v
            .issue_token(user_id, Some("Ana".into()), Some("ana@example.com".into()), 3600)
            .unwrap();

        let claims = v.validate_token(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let v = verifier();
        let token = v.issue_token(Uuid::new_v4(), None, None, -60).unwrap();
        assert!(v.validate_token(&token).is_err());
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let v = verifier();
        let other = AuthVerifier::new(AuthConfig::new(
            "test_secret_key_for_testing_purposes_only_32chars".into(),
            "vitrine".into(),
            "somewhere-else".into(),
        ));
        let token = other.issue_token(Uuid::new_v4(), None, None, 3600).unwrap();
        assert!(v.validate_token(&token).is_err());
    }
}
