use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ErrorMessage, HttpError},
    models::usermodel::UserRole,
};

/// Claims issued by the identity provider. `sub` is the user id.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub role: UserRole,
    pub iat: usize,
    pub exp: usize,
}

pub fn create_token(
    user_id: &str,
    role: UserRole,
    secret: &[u8],
    expires_in_seconds: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    if user_id.is_empty() {
        return Err(jsonwebtoken::errors::ErrorKind::InvalidSubject.into());
    }

    let now = Utc::now();
    let iat = now.timestamp() as usize;
    let exp = (now + Duration::seconds(expires_in_seconds)).timestamp() as usize;
    let claims = TokenClaims {
        sub: user_id.to_string(),
        role,
        iat,
        exp,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

pub fn decode_token<T: Into<String>>(token: T, secret: &[u8]) -> Result<TokenClaims, HttpError> {
    let decoded = decode::<TokenClaims>(
        &token.into(),
        &DecodingKey::from_secret(secret),
        &Validation::new(Algorithm::HS256),
    );

    match decoded {
        Ok(token) => Ok(token.claims),
        Err(_) => Err(HttpError::unauthorized(ErrorMessage::InvalidToken.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip_keeps_role() {
        let token = create_token("8f1e0c1a-1111-4b7a-9d59-6a0b8e2c0a11", UserRole::StoreOwner, b"secret", 60)
            .unwrap();
        let claims = decode_token(token, b"secret").unwrap();

        assert_eq!(claims.sub, "8f1e0c1a-1111-4b7a-9d59-6a0b8e2c0a11");
        assert_eq!(claims.role, UserRole::StoreOwner);
    }

    #[test]
    fn test_token_with_wrong_secret_is_rejected() {
        let token = create_token("someone", UserRole::Customer, b"secret", 60).unwrap();
        assert!(decode_token(token, b"other").is_err());
    }

    #[test]
    fn test_empty_subject_is_rejected() {
        assert!(create_token("", UserRole::Customer, b"secret", 60).is_err());
    }
}
