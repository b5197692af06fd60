//! Password hashing, JWT issuance and the `AuthUser` extractor.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::cache::SharedCache;
use crate::channels::{ChannelKind, Channels, OutgoingMessage};
use crate::clock::SharedClock;
use crate::error::{AppError, Result};
use crate::models::{PublicUser, Role};
use crate::services::users::{NewUser, UserService};
use crate::state::AppState;

const RESET_TTL: Duration = Duration::from_secs(3600);
const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str) -> Result<String> {
    Pbkdf2
        .hash_password(password.as_bytes(), &SaltString::generate(&mut OsRng))
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: u64,
}

#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, user_id: Uuid, role: Role, now: chrono::DateTime<chrono::Utc>) -> Result<String> {
        let exp = now.timestamp().max(0) as u64 + self.ttl.as_secs();
        let claims = Claims {
            sub: user_id,
            role,
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| AppError::Unauthorized(format!("invalid token: {e}")))
    }
}

/// Authenticated caller, taken from the bearer token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn require(&self, roles: &[Role]) -> Result<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    /// Students may only act on themselves; every other role may act on anyone.
    pub fn require_self_or_staff(&self, user_id: Uuid) -> Result<()> {
        if self.role == Role::Student && self.id != user_id {
            return Err(AppError::Forbidden);
        }
        Ok(())
    }
}

impl From<Claims> for AuthUser {
    fn from(c: Claims) -> Self {
        Self {
            id: c.sub,
            role: c.role,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::Unauthorized("missing bearer token".to_string()))?;
        state.jwt.verify(bearer.token()).map(AuthUser::from)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct SignupReq {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Option<Role>,
    pub phone: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ForgotPasswordReq {
    pub email: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ResetPasswordReq {
    pub token: String,
    pub password: String,
}

fn reset_key(token: &str) -> String {
    format!("password-reset:{token}")
}

fn check_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct AuthService {
    users: UserService,
    cache: SharedCache,
    channels: Channels,
    jwt: JwtKeys,
    clock: SharedClock,
}

impl AuthService {
    pub fn new(
        users: UserService,
        cache: SharedCache,
        channels: Channels,
        jwt: JwtKeys,
        clock: SharedClock,
    ) -> Self {
        Self {
            users,
            cache,
            channels,
            jwt,
            clock,
        }
    }

    /// Self-registration is for students only.
    pub async fn signup(&self, req: SignupReq) -> Result<PublicUser> {
        let role = req.role.unwrap_or(Role::Student);
        if role != Role::Student {
            return Err(AppError::Forbidden);
        }
        check_password(&req.password)?;
        let user = self
            .users
            .create(NewUser {
                email: req.email,
                name: req.name,
                password_hash: hash_password(&req.password)?,
                role,
                phone: req.phone,
                telegram_id: None,
            })
            .await?;
        Ok(user.into())
    }

    pub async fn login(&self, req: LoginReq) -> Result<TokenResponse> {
        let invalid = || AppError::Unauthorized("invalid email or password".to_string());
        let user = self.users.find_by_email(&req.email).await?.ok_or_else(invalid)?;
        if !verify_password(&req.password, &user.password_hash) {
            tracing::info!(user_id = %user.id, "failed login");
            return Err(invalid());
        }
        let access_token = self.jwt.issue(user.id, user.role, self.clock.now())?;
        Ok(TokenResponse { access_token })
    }

    /// Answers the same way whether or not the email is known.
    pub async fn forgot_password(&self, req: ForgotPasswordReq) -> Result<()> {
        let Some(user) = self.users.find_by_email(&req.email).await? else {
            tracing::debug!("password reset requested for unknown email");
            return Ok(());
        };
        let token = Uuid::new_v4().simple().to_string();
        self.cache
            .set_ex(&reset_key(&token), &user.id.to_string(), RESET_TTL)
            .await?;

        match self.channels.get(ChannelKind::Email) {
            Some(email) => {
                let message = OutgoingMessage {
                    notification_id: None,
                    title: Some("Password reset".to_string()),
                    body: format!("Use this code to reset your password: {token}. It expires in one hour."),
                };
                if let Err(e) = email.send(&user.email, &message).await {
                    tracing::warn!(user_id = %user.id, error = %e, "password reset email failed");
                }
            }
            None => tracing::warn!(user_id = %user.id, "no email channel, reset token not delivered"),
        }
        Ok(())
    }

    pub async fn reset_password(&self, req: ResetPasswordReq) -> Result<()> {
        check_password(&req.password)?;
        let key = reset_key(req.token.trim());
        let expired = || AppError::validation("reset token is invalid or expired");
        let raw = self.cache.get(&key).await?.ok_or_else(expired)?;
        let user_id = Uuid::parse_str(&raw).map_err(|_| expired())?;
        self.users
            .set_password_hash(user_id, hash_password(&req.password)?)
            .await?;
        if let Err(e) = self.cache.delete(&key).await {
            tracing::warn!(%user_id, error = %e, "failed to consume reset token");
        }
        tracing::info!(%user_id, "password reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEnv;

    fn signup(email: &str, role: Option<Role>) -> SignupReq {
        SignupReq {
            email: email.into(),
            password: "correct horse".into(),
            name: "Sam".into(),
            role,
            phone: None,
        }
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$pbkdf2"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "garbage"));
    }

    #[test]
    fn tokens_verify_with_the_same_secret_only() {
        let keys = JwtKeys::new("secret", Duration::from_secs(60));
        let id = Uuid::new_v4();
        let token = keys.issue(id, Role::Teacher, chrono::Utc::now()).unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.role, Role::Teacher);

        let other = JwtKeys::new("other", Duration::from_secs(60));
        assert!(matches!(other.verify(&token), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = JwtKeys::new("secret", Duration::from_secs(60));
        let token = keys
            .issue(Uuid::new_v4(), Role::Student, chrono::Utc::now() - chrono::Duration::hours(2))
            .unwrap();
        assert!(keys.verify(&token).is_err());
    }

    #[tokio::test]
    async fn signup_then_login() {
        let env = TestEnv::new();
        let user = env.auth.signup(signup("new@example.com", None)).await.unwrap();
        assert_eq!(user.role, Role::Student);

        let token = env
            .auth
            .login(LoginReq {
                email: "NEW@example.com".into(),
                password: "correct horse".into(),
            })
            .await
            .unwrap();
        let claims = env.jwt.verify(&token.access_token).unwrap();
        assert_eq!(claims.sub, user.id);

        let bad = env
            .auth
            .login(LoginReq {
                email: "new@example.com".into(),
                password: "wrong password".into(),
            })
            .await;
        assert!(matches!(bad, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn only_students_self_register() {
        let env = TestEnv::new();
        let err = env
            .auth
            .signup(signup("boss@example.com", Some(Role::Admin)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[tokio::test]
    async fn reset_flow_consumes_the_token() {
        let env = TestEnv::new();
        env.auth.signup(signup("forgetful@example.com", None)).await.unwrap();
        env.auth
            .forgot_password(ForgotPasswordReq {
                email: "forgetful@example.com".into(),
            })
            .await
            .unwrap();

        let sent = env.email.sent();
        assert_eq!(sent.len(), 1);
        let token = sent[0]
            .1
            .split_whitespace()
            .find(|w| w.len() == 33 && w.ends_with('.'))
            .map(|w| w.trim_end_matches('.').to_string())
            .unwrap();

        let reset = ResetPasswordReq {
            token: token.clone(),
            password: "brand new pass".into(),
        };
        env.auth.reset_password(reset.clone()).await.unwrap();
        env.auth
            .login(LoginReq {
                email: "forgetful@example.com".into(),
                password: "brand new pass".into(),
            })
            .await
            .unwrap();

        let again = env.auth.reset_password(reset).await;
        assert!(matches!(again, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_email_is_answered_silently() {
        let env = TestEnv::new();
        env.auth
            .forgot_password(ForgotPasswordReq {
                email: "ghost@example.com".into(),
            })
            .await
            .unwrap();
        assert!(env.email.sent().is_empty());
    }
}
