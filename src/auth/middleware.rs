//! Authentication middleware
//!
//! Protects routes that require authentication.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, State},
    http::{HeaderMap, Request, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use super::session::{Session, verify_session_token};
use crate::AppState;
use crate::error::AppError;

fn extract_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(ToOwned::to_owned)
        .or_else(|| {
            let jar = CookieJar::from_headers(headers);
            jar.get("session").map(|cookie| cookie.value().to_owned())
        })
}

/// Tokens issued for longer than `auth.session_max_age` are refused.
fn authenticate_token(token: &str, state: &AppState) -> Result<Session, AppError> {
    let session = verify_session_token(token, &state.config.auth.session_secret)?;
    if session.exceeds_max_age(state.config.auth.session_max_age) {
        tracing::warn!(user_id = %session.user_id, "Session outlives configured max age");
        return Err(AppError::Unauthorized);
    }
    Ok(session)
}

/// Middleware to require authentication
///
/// Extracts and verifies session from cookie or Authorization header.
/// Adds Session to request extensions if valid.
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/metrics", ...)
///     .layer(middleware::from_fn_with_state(state, require_auth));
/// ```
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token_from_headers(request.headers()).ok_or(AppError::Unauthorized)?;
    let session = authenticate_token(&token, &state)?;
    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}

/// Extractor for current authenticated user
///
/// # Usage
/// ```ignore
/// async fn handler(
///     CurrentUser(session): CurrentUser,
/// ) -> impl IntoResponse {
///     format!("Hello, {}", session.user_id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Session);

impl CurrentUser {
    /// Reject a request body naming a different user
    pub fn ensure_same_user(&self, claimed: Option<&str>) -> Result<&str, AppError> {
        match claimed {
            Some(user_id) if user_id != self.0.user_id => {
                tracing::warn!(
                    session_user = %self.0.user_id,
                    claimed_user = %user_id,
                    "Request body names another user"
                );
                Err(AppError::Forbidden)
            }
            _ => Ok(&self.0.user_id),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(session) = parts.extensions.get::<Session>().cloned() {
            return Ok(CurrentUser(session));
        }

        let state = AppState::from_ref(state);
        let token = extract_token_from_headers(&parts.headers).ok_or(AppError::Unauthorized)?;
        let session = authenticate_token(&token, &state)?;
        parts.extensions.insert(session.clone());

        Ok(CurrentUser(session))
    }
}

/// Optional current user extractor
///
/// Returns None if not authenticated, instead of error.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Session>);

impl MaybeUser {
    pub fn user_id(&self) -> Option<&str> {
        self.0.as_ref().map(|session| session.user_id.as_str())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(session) = parts.extensions.get::<Session>().cloned() {
            return Ok(MaybeUser(Some(session)));
        }

        let app_state = AppState::from_ref(state);
        let session = extract_token_from_headers(&parts.headers)
            .and_then(|token| authenticate_token(&token, &app_state).ok());

        if let Some(session) = &session {
            parts.extensions.insert(session.clone());
        }

        Ok(MaybeUser(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer abc.def"));
        headers.insert("Cookie", HeaderValue::from_static("session=zzz.yyy"));
        assert_eq!(extract_token_from_headers(&headers).as_deref(), Some("abc.def"));
    }

    #[test]
    fn session_cookie_is_used_without_header() {
        let mut headers = HeaderMap::new();
        headers.insert("Cookie", HeaderValue::from_static("theme=dark; session=zzz.yyy"));
        assert_eq!(extract_token_from_headers(&headers).as_deref(), Some("zzz.yyy"));
        assert!(extract_token_from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn body_user_must_match_session() {
        let user = CurrentUser(Session::new("user-1", None, 60));
        assert_eq!(user.ensure_same_user(None).unwrap(), "user-1");
        assert_eq!(user.ensure_same_user(Some("user-1")).unwrap(), "user-1");
        assert!(matches!(
            user.ensure_same_user(Some("user-2")),
            Err(AppError::Forbidden)
        ));
    }
}
