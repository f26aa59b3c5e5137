/*!
 * # Authentication and Authorization
 *
 * Bearer-token verification for the storefront API. Tokens are HS256 JWTs
 * issued elsewhere; this module only verifies them (signature, expiry,
 * issuer, audience) and resolves the subject to a stored user.
 *
 * Two gates are provided as axum middleware:
 *
 * - [`auth_middleware`] requires a valid token for a known user and places
 *   an [`AuthUser`] in the request extensions
 * - [`admin_middleware`] additionally requires that user to be an admin
 *
 * Routers opt in through [`AuthRouterExt`].
 */

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::user;
use crate::repositories::UserRepository;

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,          // Subject (user ID)
    #[serde(default)]
    pub name: Option<String>, // User's name
    #[serde(default)]
    pub email: Option<String>, // User's email
    pub jti: String,          // JWT ID
    pub iat: i64,             // Issued at time
    pub exp: i64,             // Expiration time
    pub nbf: i64,             // Not valid before time
    pub iss: String,          // Issuer
    pub aud: String,          // Audience
}

/// The caller, resolved from a verified token against the users table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
}

impl From<user::Model> for AuthUser {
    fn from(model: user::Model) -> Self {
        Self {
            user_id: model.id,
            name: model.name,
            email: model.email,
            is_admin: model.is_admin,
        }
    }
}

/// An [`AuthUser`] that passed the admin gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminUser(pub AuthUser);

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub token_ttl: Duration,
}

impl AuthConfig {
    pub fn new(
        jwt_secret: String,
        jwt_issuer: String,
        jwt_audience: String,
        token_ttl: Duration,
    ) -> Self {
        Self {
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            token_ttl,
        }
    }
}

impl From<&AppConfig> for AuthConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.jwt_secret.clone(),
            cfg.auth_issuer.clone(),
            cfg.auth_audience.clone(),
            Duration::from_secs(cfg.jwt_expiration),
        )
    }
}

/// Verifies bearer tokens and resolves them to stored users
pub struct AuthService {
    config: AuthConfig,
    users: Arc<dyn UserRepository>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("issuer", &self.config.jwt_issuer)
            .field("audience", &self.config.jwt_audience)
            .finish()
    }
}

impl AuthService {
    pub fn new(config: AuthConfig, users: Arc<dyn UserRepository>) -> Self {
        Self { config, users }
    }

    /// Signs a token for `user`. Used by the operator CLI and tests; end-user
    /// token issuance lives outside this service.
    pub fn issue_token(&self, user: &user::Model) -> Result<String, AuthError> {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(self.config.token_ttl)
            .map_err(|_| AuthError::TokenCreation("Invalid token duration".to_string()))?;

        let claims = Claims {
            sub: user.id.to_string(),
            name: Some(user.name.clone()),
            email: Some(user.email.clone()),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            nbf: now.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    /// Validate a JWT token and extract the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);
        validation.validate_nbf = true;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => {
                debug!(error = %e, "Rejected bearer token");
                AuthError::InvalidToken
            }
        })?
        .claims;

        Ok(claims)
    }

    /// Verifies `token` and loads the user it names.
    pub async fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        let claims = self.validate_token(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;

        let user = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(|e| {
                error!(error = %e, "User lookup failed during authentication");
                AuthError::DatabaseError(e.to_string())
            })?
            .ok_or(AuthError::UserNotFound)?;

        Ok(AuthUser::from(user))
    }
}

/// Authentication error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Not authorized as an admin")]
    NotAdmin,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::InvalidToken | Self::TokenExpired | Self::UserNotFound => {
                StatusCode::UNAUTHORIZED
            }
            Self::NotAdmin => StatusCode::FORBIDDEN,
            Self::TokenCreation(_) | Self::DatabaseError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "AUTH_MISSING_TOKEN",
            Self::InvalidToken => "AUTH_INVALID_TOKEN",
            Self::TokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::TokenCreation(_) => "AUTH_TOKEN_CREATION_FAILED",
            Self::UserNotFound => "AUTH_USER_NOT_FOUND",
            Self::NotAdmin => "AUTH_NOT_ADMIN",
            Self::DatabaseError(_) => "AUTH_DATABASE_ERROR",
            Self::InternalError(_) => "AUTH_INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::MissingToken => "Not authorized, no token".to_string(),
            Self::InvalidToken => "Not authorized, token failed".to_string(),
            Self::TokenExpired => "Token has expired".to_string(),
            Self::UserNotFound => "Not authorized, user not found".to_string(),
            Self::NotAdmin => "Not authorized as an admin".to_string(),
            // Internal details stay in the logs
            Self::TokenCreation(_) | Self::DatabaseError(_) | Self::InternalError(_) => {
                "Authentication failed".to_string()
            }
        };

        let body = Json(serde_json::json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (self.status_code(), body).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(AuthError::NotAdmin);
        }
        Ok(AdminUser(user))
    }
}

/// Makes the [`AuthService`] reachable from per-route auth layers.
pub async fn inject_auth_service(
    State(auth_service): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().insert(auth_service);
    next.run(request).await
}

/// Authentication middleware that verifies the bearer token
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_service = match request.extensions().get::<Arc<AuthService>>() {
        Some(service) => service.clone(),
        None => {
            error!("Authentication service missing from request extensions");
            return AuthError::InternalError("Authentication service not available".to_string())
                .into_response();
        }
    };

    let auth_result = match bearer_token(request.headers()) {
        Some(token) => auth_service.authenticate(token).await,
        None => Err(AuthError::MissingToken),
    };

    match auth_result {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => {
            counter!("storefront.auth.failures", 1);
            warn!(code = e.code(), path = %request.uri().path(), "Authentication rejected");
            e.into_response()
        }
    }
}

/// Admin gate; expects [`auth_middleware`] to have run first
pub async fn admin_middleware(request: Request, next: Next) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::MissingToken)?;

    if !user.is_admin {
        counter!("storefront.auth.admin_denied", 1);
        warn!(user_id = %user.user_id, path = %request.uri().path(), "Admin access denied");
        return Err(AuthError::NotAdmin);
    }

    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_admin(self) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_admin(self) -> Self {
        self.layer(axum::middleware::from_fn(admin_middleware))
            .with_auth()
    }
}
