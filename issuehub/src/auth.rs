//! Authentication Gate
//!
//! Password hashing, the session cookie, and the request-scoped extractors
//! handlers use to learn who is calling:
//! - [`Session`] - whatever session the request carries, possibly anonymous
//! - [`CurrentUser`] - an authenticated user, or a redirect to `/login/`

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use axum::{
    extract::FromRequestParts,
    http::{
        HeaderMap, HeaderValue,
        header::{COOKIE, SET_COOKIE},
        request::Parts,
    },
    response::{IntoResponse, Redirect, Response},
};
use cookie::{Cookie, SameSite, time::Duration};
use rand::RngCore;
use uuid::Uuid;

use crate::{
    config::Config,
    database::{Database, DatabaseError},
    error::AppError,
    models::{Flash, User},
    web::AppState,
};

pub const LOGIN_PATH: &str = "/login/";

/// Anonymous sessions only carry flash messages to the next page.
const ANONYMOUS_SESSION_SECS: i64 = 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

/// Hash a password into a PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Hashing(e.to_string()))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// `false` on mismatch and on a hash that cannot be parsed.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is malformed");
            false
        }
    }
}

/// Opaque, unguessable session identifier.
pub fn new_session_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Builds and reads the session cookie, and decides how long a login lasts.
#[derive(Debug, Clone)]
pub struct SessionCookies {
    name: String,
    remember_me_days: i64,
    session_hours: i64,
}

impl SessionCookies {
    pub fn new(config: &Config) -> Self {
        Self {
            name: config.session_cookie.clone(),
            remember_me_days: config.remember_me_days,
            session_hours: config.session_hours,
        }
    }

    /// Server-side lifetime of a login session.
    pub fn login_ttl(&self, remember: bool) -> Duration {
        if remember {
            Duration::days(self.remember_me_days)
        } else {
            Duration::hours(self.session_hours)
        }
    }

    /// `Set-Cookie` value for `token`. Without `remember` the cookie lasts
    /// for the browser session only.
    pub fn issue(&self, token: &str, remember: bool) -> Result<HeaderValue, AppError> {
        let mut builder = Cookie::build((self.name.clone(), token.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax);
        if remember {
            builder = builder.max_age(self.login_ttl(true));
        }
        Ok(HeaderValue::try_from(builder.build().to_string())?)
    }

    /// `Set-Cookie` value that makes the browser drop the cookie.
    pub fn clear(&self) -> Result<HeaderValue, AppError> {
        let mut cookie = Cookie::build((self.name.clone(), String::new()))
            .path("/")
            .build();
        cookie.make_removal();
        Ok(HeaderValue::try_from(cookie.to_string())?)
    }

    pub fn read(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(Result::ok)
            .find(|cookie| cookie.name() == self.name)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// Attach an optional `Set-Cookie` header to a response.
pub fn with_cookie(response: impl IntoResponse, cookie: Option<HeaderValue>) -> Response {
    let mut response = response.into_response();
    if let Some(cookie) = cookie {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

/// The session a request carries. `token` is `None` when the request had no
/// (valid) session cookie.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub token: Option<String>,
    pub user: Option<User>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Make sure a server-side session exists. Returns the cookie to set when
    /// one had to be created.
    pub async fn ensure(&mut self, state: &AppState) -> Result<Option<HeaderValue>, AppError> {
        if self.token.is_some() {
            return Ok(None);
        }
        let token = new_session_token();
        state
            .db
            .create_session(&token, None, ANONYMOUS_SESSION_SECS)
            .await?;
        let cookie = state.cookies.issue(&token, false)?;
        self.token = Some(token);
        Ok(Some(cookie))
    }

    /// Queue a message for the next rendered page.
    pub async fn flash(
        &mut self,
        state: &AppState,
        category: &str,
        message: &str,
    ) -> Result<Option<HeaderValue>, AppError> {
        let cookie = self.ensure(state).await?;
        if let Some(token) = &self.token {
            state.db.push_flash(token, category, message).await?;
        }
        Ok(cookie)
    }

    pub async fn take_flashes(&self, db: &Database) -> Result<Vec<Flash>, AppError> {
        match &self.token {
            Some(token) => Ok(db
                .take_flashes(token)
                .await?
                .into_iter()
                .map(Flash::from)
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    /// Bind a fresh token to `user`, replacing the current one.
    pub async fn login(
        &mut self,
        state: &AppState,
        user: User,
        remember: bool,
    ) -> Result<HeaderValue, AppError> {
        let token = new_session_token();
        let ttl = state.cookies.login_ttl(remember).whole_seconds();
        state
            .db
            .rotate_session(self.token.as_deref(), &token, user.id, ttl)
            .await?;
        let cookie = state.cookies.issue(&token, remember)?;
        self.token = Some(token);
        self.user = Some(user);
        Ok(cookie)
    }

    pub async fn logout(&mut self, state: &AppState) -> Result<HeaderValue, AppError> {
        if let Some(token) = self.token.take() {
            state.db.delete_session(&token).await?;
        }
        self.user = None;
        state.cookies.clear()
    }
}

impl FromRequestParts<AppState> for Session {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = state.cookies.read(&parts.headers) else {
            return Ok(Session::default());
        };

        // Unknown and expired tokens are treated as no session at all.
        let Some(row) = state.db.get_session(&token).await? else {
            return Ok(Session::default());
        };

        let user = match row.user_id {
            Some(id) => match state.db.get_user_by_id(id).await {
                Ok(user) => Some(User::from(user)),
                Err(DatabaseError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        Ok(Session {
            token: Some(token),
            user,
        })
    }
}

/// An authenticated caller. Rejects with a redirect to the login page.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub session: Session,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        match session.user.clone() {
            Some(user) => Ok(CurrentUser { user, session }),
            None => Err(Redirect::to(LOGIN_PATH).into_response()),
        }
    }
}
