use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

#[derive(Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub secret: String,
    pub ttl_seconds: u64,
}

/// Identity embedded in an access token.
#[derive(Debug, Clone)]
pub struct TokenSubject<'a> {
    pub user_id: &'a str,
    pub email: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub exp: usize,
    pub iat: usize,
    pub jti: String,
    pub aud: String,
    pub iss: String,
}

/// Whether write endpoints accept requests without a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Off,
    Required,
}

impl FromStr for AuthMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" | "" => Ok(AuthMode::Off),
            "required" => Ok(AuthMode::Required),
            other => Err(anyhow!("unknown auth mode: {other}")),
        }
    }
}

pub fn issue_token(
    subject: &TokenSubject<'_>,
    config: &JwtConfig,
) -> Result<(String, AccessTokenClaims)> {
    let now = unix_seconds()?;
    let exp = now
        .checked_add(config.ttl_seconds)
        .ok_or_else(|| anyhow!("token expiry overflow"))?;

    let claims = AccessTokenClaims {
        sub: subject.user_id.to_string(),
        email: subject.email.to_string(),
        name: subject.name.to_string(),
        exp: exp as usize,
        iat: now as usize,
        jti: Uuid::new_v4().to_string(),
        aud: config.audience.clone(),
        iss: config.issuer.clone(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?;

    Ok((token, claims))
}

pub fn verify_token(token: &str, config: &JwtConfig) -> Result<AccessTokenClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[config.audience.as_str()]);
    validation.set_issuer(&[config.issuer.as_str()]);

    let data = decode::<AccessTokenClaims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Opaque one-time token used for email verification links.
pub fn generate_verification_token() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn unix_seconds() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .map_err(|_| anyhow!("invalid system clock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            issuer: "civic-api".into(),
            audience: "civic-web".into(),
            secret: "test-secret".into(),
            ttl_seconds: 60,
        }
    }

    fn subject() -> TokenSubject<'static> {
        TokenSubject {
            user_id: "user-1",
            email: "priya@example.com",
            name: "Priya K",
        }
    }

    #[test]
    fn issued_token_verifies_with_same_config() {
        let config = config();
        let (token, issued) = issue_token(&subject(), &config).unwrap();
        let claims = verify_token(&token, &config).unwrap();

        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email, "priya@example.com");
        assert_eq!(claims.name, "Priya K");
        assert_eq!(claims.exp, issued.exp);
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let (token, _) = issue_token(&subject(), &config()).unwrap();
        let mut other = config();
        other.secret = "another-secret".into();
        assert!(verify_token(&token, &other).is_err());
    }

    #[test]
    fn token_for_other_audience_is_rejected() {
        let (token, _) = issue_token(&subject(), &config()).unwrap();
        let mut other = config();
        other.audience = "admin-web".into();
        assert!(verify_token(&token, &other).is_err());
    }

    #[test]
    fn auth_mode_parses_known_values() {
        assert_eq!("off".parse::<AuthMode>().unwrap(), AuthMode::Off);
        assert_eq!("Required".parse::<AuthMode>().unwrap(), AuthMode::Required);
        assert!("sometimes".parse::<AuthMode>().is_err());
    }

    #[test]
    fn verification_tokens_are_unique() {
        let first = generate_verification_token();
        let second = generate_verification_token();
        assert_eq!(first.len(), 32);
        assert_ne!(first, second);
    }
}
