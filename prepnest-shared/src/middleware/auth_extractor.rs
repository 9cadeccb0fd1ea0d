use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::errors::{AppError, ErrorCode};
use crate::types::auth::{AuthUser, Claims};

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)?;
        let claims = validate_jwt(&token)?;

        if claims.is_expired() {
            return Err(AppError::new(ErrorCode::TokenExpired, "token has expired"));
        }

        Ok(AuthUser::from(claims))
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "missing authorization header"))?
        .to_str()
        .map_err(|_| AppError::new(ErrorCode::Unauthorized, "invalid authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| {
            AppError::new(ErrorCode::Unauthorized, "authorization header must use Bearer scheme")
        })?;

    Ok(token.to_string())
}

/// Validate a JWT issued by the auth service, for REST requests and socket
/// handshakes alike.
pub fn validate_jwt_with_secret(token: &str, secret: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::new(ErrorCode::TokenExpired, "token has expired")
        }
        _ => AppError::new(ErrorCode::TokenInvalid, format!("invalid token: {e}")),
    })?;

    Ok(token_data.claims)
}

fn validate_jwt(token: &str) -> Result<Claims, AppError> {
    let jwt_secret = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "development-secret-change-in-production".to_string());
    validate_jwt_with_secret(token, &jwt_secret)
}

/// Optional auth extractor
pub struct OptionalAuthUser(pub Option<AuthUser>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for OptionalAuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match AuthUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(Self(Some(user))),
            Err(_) => Ok(Self(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::auth::UserRole;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    fn sign(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_round_trips() {
        let claims = Claims::new(Uuid::new_v4(), UserRole::Student, 3600);
        let token = sign(&claims, "s3cret");
        let decoded = validate_jwt_with_secret(&token, "s3cret").unwrap();
        assert_eq!(decoded.sub, claims.sub);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let claims = Claims::new(Uuid::new_v4(), UserRole::Student, 3600);
        let token = sign(&claims, "s3cret");
        assert!(validate_jwt_with_secret(&token, "other").is_err());
    }
}
