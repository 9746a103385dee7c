//! Short-lived bearer tokens. The role claim only reflects the role at issue
//! time; access checks always reload the user row.

use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::User;

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub name: String,
    pub role: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let secret = config.jwt_secret.as_bytes();
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            ttl: Duration::minutes(config.jwt_expiry_minutes),
        })
    }

    /// Lifetime of an access token, reported to clients as `expires_in`.
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub fn issue(&self, user: &User) -> Result<String> {
        let issued_at = Utc::now();
        self.sign(&AccessClaims {
            sub: user.id,
            name: user.name.clone(),
            role: user.role.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: issued_at.timestamp(),
            exp: (issued_at + self.ttl).timestamp(),
        })
    }

    pub fn verify(&self, token: &str) -> Result<AccessClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_issuer(&[self.issuer.as_str()]);
        Ok(decode::<AccessClaims>(token, &self.decoding, &validation)?.claims)
    }

    fn sign(&self, claims: &AccessClaims) -> Result<String> {
        Ok(encode(&Header::default(), claims, &self.encoding)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(secret: &str) -> JwtService {
        JwtService {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: "orchestrator".into(),
            audience: "orchestrator-api".into(),
            ttl: Duration::minutes(15),
        }
    }

    fn user() -> User {
        let now = Utc::now().naive_utc();
        User {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@agency.test".into(),
            password_hash: String::new(),
            role: "manager".into(),
            designation: None,
            avatar_file_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn issued_tokens_carry_the_user() {
        let jwt = service("secret");
        let user = user();
        let claims = jwt.verify(&jwt.issue(&user).unwrap()).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, "manager");
        assert_eq!(claims.exp - claims.iat, jwt.ttl_seconds());
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let token = service("one").issue(&user()).unwrap();
        assert!(service("two").verify(&token).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let jwt = service("secret");
        let past = Utc::now() - Duration::hours(2);
        let token = jwt
            .sign(&AccessClaims {
                sub: Uuid::new_v4(),
                name: "Old".into(),
                role: "employee".into(),
                iss: jwt.issuer.clone(),
                aud: jwt.audience.clone(),
                iat: past.timestamp(),
                exp: (past + Duration::minutes(15)).timestamp(),
            })
            .unwrap();
        assert!(jwt.verify(&token).is_err());
    }
}
