//! Bearer-token sessions: provider sign-in, JWT issue/verify and the
//! extractors handlers use to learn who is calling.

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::Json;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::typed_header::TypedHeaderRejectionReason;
use axum_extra::TypedHeader;
use catalog::{OAuthProvider, Plan, User};
use foundation::{now_ms, UserId};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{ApiError, ApiForm, ApiPath};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

/// HS256 signing material plus the token lifetime.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: u64,
}

impl TokenKeys {
    pub fn new(secret: &[u8], ttl_minutes: u32) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl_secs: u64::from(ttl_minutes) * 60,
        }
    }

    pub fn issue(&self, user: &UserId) -> Result<String, ApiError> {
        self.issue_at(user, now_ms() / 1000)
    }

    /// Issue a token as if it were minted at `iat` (seconds since the epoch).
    pub fn issue_at(&self, user: &UserId, iat: u64) -> Result<String, ApiError> {
        let claims = Claims {
            sub: user.to_string(),
            iat,
            exp: iat + self.ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            warn!(error = %e, "failed to sign access token");
            ApiError::Internal
        })
    }

    pub fn verify(&self, token: &str) -> Result<UserId, ApiError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => ApiError::Unauthorized("Token has expired"),
                _ => ApiError::Unauthorized("Could not validate credentials"),
            }
        })?;
        data.claims
            .sub
            .parse()
            .map_err(|_| ApiError::Unauthorized("Could not validate credentials"))
    }
}

/// The signed-in caller. Rejects with 401 when no valid token is present.
pub struct CurrentUser(pub User);

/// The caller if a token was sent. A present but invalid token still
/// rejects with 401.
pub struct MaybeUser(pub Option<User>);

impl MaybeUser {
    pub fn user(&self) -> Option<&User> {
        self.0.as_ref()
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts, state)
            .await?
            .ok_or(ApiError::Unauthorized("Not authenticated"))?;
        authenticate(state, &token).await.map(CurrentUser)
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match bearer_token(parts, state).await? {
            Some(token) => authenticate(state, &token).await.map(|u| MaybeUser(Some(u))),
            None => Ok(MaybeUser(None)),
        }
    }
}

async fn bearer_token(parts: &mut Parts, state: &AppState) -> Result<Option<String>, ApiError> {
    match TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await {
        Ok(TypedHeader(Authorization(bearer))) => Ok(Some(bearer.token().to_string())),
        Err(rej) if matches!(rej.reason(), TypedHeaderRejectionReason::Missing) => Ok(None),
        Err(_) => Err(ApiError::Unauthorized("Could not validate credentials")),
    }
}

async fn authenticate(state: &AppState, token: &str) -> Result<User, ApiError> {
    let id = state.tokens.verify(token)?;
    let user = state
        .catalog
        .store()
        .user(&id)
        .await?
        .ok_or(ApiError::Unauthorized("User not found"))?;
    if !user.is_active {
        return Err(ApiError::BadRequest("Inactive user".to_string()));
    }
    Ok(user)
}

/// User as shown to clients; the provider subject stays server-side.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub provider: OAuthProvider,
    pub plan: Plan,
    pub is_active: bool,
    pub created_at_ms: u64,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            username: u.username.clone(),
            full_name: u.full_name.clone(),
            avatar_url: u.avatar_url.clone(),
            provider: u.provider,
            plan: u.plan,
            is_active: u.is_active,
            created_at_ms: u.created_at_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub user: UserView,
}

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub token: String,
}

pub async fn login(
    State(state): State<AppState>,
    ApiPath(provider): ApiPath<String>,
    ApiForm(form): ApiForm<TokenForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    let provider: OAuthProvider = provider
        .parse()
        .map_err(|_| ApiError::NotFound("Unknown provider".to_string()))?;
    let token = form.token.trim();
    if token.is_empty() {
        return Err(ApiError::Unprocessable("Missing provider token".to_string()));
    }

    let profile = state.identity.verify(provider, token).await.map_err(|e| {
        warn!(provider = provider.as_str(), error = %e, "provider rejected token");
        ApiError::BadRequest(format!("Invalid {} token", provider.label()))
    })?;
    let user = state.catalog.sign_in(profile).await?;
    info!(user_id = %user.id, provider = provider.as_str(), "user signed in");

    Ok(Json(TokenResponse {
        access_token: state.tokens.issue(&user.id)?,
        token_type: "bearer",
        user: UserView::from(&user),
    }))
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserView> {
    Json(UserView::from(&user))
}

/// Tokens are stateless; the client drops its copy.
pub async fn logout() -> Json<Value> {
    Json(json!({ "message": "Logged out successfully" }))
}

pub async fn oauth_config(State(state): State<AppState>) -> Json<Value> {
    let ids = &state.config.oauth;
    Json(json!({
        "google_client_id": ids.google.clone().unwrap_or_default(),
        "github_client_id": ids.github.clone().unwrap_or_default(),
        "linkedin_client_id": ids.linkedin.clone().unwrap_or_default(),
        "oauth_enabled": ids.any(),
    }))
}
