//! JWT Token 管理
//!
//! HS256 签名，密钥由应用 `secret_key` 经 SHA-256 派生

use anyhow::Result;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::AuthError;
use super::passport::AuthenticatedUser;

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// 用户标识
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: usize,
    pub exp: usize,
}

fn derive_secret_key(secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

/// Token 签发与校验
#[derive(Clone)]
pub struct JwtManager {
    secret: Vec<u8>,
    ttl_secs: u64,
}

impl JwtManager {
    pub fn new(app_secret: &str, ttl_secs: u64) -> Self {
        Self {
            secret: derive_secret_key(app_secret),
            ttl_secs,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// 为用户签发 token，返回 `(token, expires_in)`
    pub fn issue(&self, identifier: &str, roles: &[String]) -> Result<(String, u64)> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_secs();

        let claims = Claims {
            sub: identifier.to_string(),
            roles: roles.to_vec(),
            iat: now as usize,
            exp: (now + self.ttl_secs) as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))?;
        Ok((token, self.ttl_secs))
    }

    pub fn issue_for(&self, user: &AuthenticatedUser) -> Result<(String, u64)> {
        self.issue(&user.identifier, &user.roles)
    }

    /// 校验签名与过期时间
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let jwt = JwtManager::new("app-secret", 3600);
        let (token, expires_in) = jwt.issue("fox@example.com", &["ROLE_ADMIN".into()]).unwrap();
        assert_eq!(expires_in, 3600);

        let claims = jwt.verify(&token).unwrap();
        assert_eq!(claims.sub, "fox@example.com");
        assert_eq!(claims.roles, vec!["ROLE_ADMIN"]);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_and_garbage_rejected() {
        let (token, _) = JwtManager::new("a", 60).issue("fox", &[]).unwrap();
        assert!(matches!(
            JwtManager::new("b", 60).verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(JwtManager::new("a", 60).verify("invalid.token.here").is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let jwt = JwtManager::new("a", 0);
        let (token, _) = jwt.issue("fox", &[]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(jwt.verify(&token).is_err());
    }

    #[test]
    fn test_derive_secret_key_length() {
        assert_eq!(derive_secret_key("k"), derive_secret_key("k"));
        assert_eq!(derive_secret_key("k").len(), 32);
    }
}
