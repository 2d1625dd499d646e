use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use chrono::{Duration, Utc};
use futures_util::future::{ready, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ChatError, ChatResult};
use crate::models::{LoginResponse, User};
use crate::store::{Store, StoreError};

const BCRYPT_COST: u32 = 10;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: i64,    // expiration timestamp
    pub iat: i64,    // issued at
}

/// Identity oracle: turns credentials into tokens and tokens into user ids
pub struct AuthService {
    jwt_secret: String,
    token_ttl: Duration,
    store: Arc<Store>,
}

impl AuthService {
    pub fn new(jwt_secret: String, token_ttl_days: i64, store: Arc<Store>) -> Self {
        Self {
            jwt_secret,
            token_ttl: Duration::days(token_ttl_days),
            store,
        }
    }

    /// Hash a password using bcrypt
    pub fn hash_password(&self, password: &str) -> Result<String, bcrypt::BcryptError> {
        bcrypt::hash(password, BCRYPT_COST)
    }

    /// Verify a password against a bcrypt hash
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
        bcrypt::verify(password, hash)
    }

    /// Generate a JWT token for a user
    pub fn generate_token(&self, user_id: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + self.token_ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
    }

    /// Validate a JWT token and return the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    /// User id behind a bearer token; the user must still exist
    pub fn resolve(&self, token: &str) -> ChatResult<String> {
        let claims = self.validate_token(token).map_err(|e| {
            log::debug!("Rejected token: {}", e);
            ChatError::Unauthenticated
        })?;
        if !self.store.user_exists(&claims.sub)? {
            return Err(ChatError::Unauthenticated);
        }
        Ok(claims.sub)
    }

    pub fn register(&self, name: &str, email: &str, password: &str) -> ChatResult<LoginResponse> {
        let name = name.trim();
        let email = email.trim().to_lowercase();
        if name.is_empty() || email.is_empty() || password.is_empty() {
            return Err(ChatError::invalid("Name, email and password are required"));
        }
        if self.store.email_taken(&email)? {
            return Err(ChatError::conflict("Email already registered"));
        }

        let password_hash = self
            .hash_password(password)
            .map_err(|e| ChatError::Internal(format!("Failed to hash password: {}", e)))?;
        let mut user = User {
            id: String::new(),
            name: name.to_string(),
            email,
            password_hash,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.create_user(&mut user)?;
        log::info!("Registered user {}", user.id);

        self.login_response(user)
    }

    /// Unknown email and wrong password are indistinguishable
    pub fn login(&self, email: &str, password: &str) -> ChatResult<LoginResponse> {
        let user = match self.store.get_user_by_email(&email.trim().to_lowercase()) {
            Ok(user) => user,
            Err(StoreError::NotFound(_)) => return Err(ChatError::Unauthenticated),
            Err(e) => return Err(e.into()),
        };
        if !self.verify_password(password, &user.password_hash).unwrap_or(false) {
            return Err(ChatError::Unauthenticated);
        }
        self.login_response(user)
    }

    fn login_response(&self, user: User) -> ChatResult<LoginResponse> {
        let token = self
            .generate_token(&user.id)
            .map_err(|e| ChatError::Internal(format!("Failed to generate token: {}", e)))?;
        Ok(LoginResponse { token, user })
    }
}

/// Authenticated caller, extracted from `Authorization: Bearer <jwt>`
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequest for AuthUser {
    type Error = ChatError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract_auth(req))
    }
}

fn extract_auth(req: &HttpRequest) -> ChatResult<AuthUser> {
    let auth_service = req
        .app_data::<web::Data<Arc<AuthService>>>()
        .ok_or_else(|| ChatError::Internal("Auth service not configured".to_string()))?;

    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ChatError::Unauthenticated)?;

    let user_id = auth_service.resolve(token.trim())?;
    Ok(AuthUser { user_id })
}
