use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::auth::{IdentityProvider, Session};
use crate::error::AppError;
use crate::issues::UserId;
use crate::state::AppState;

/// Represents the currently authenticated user.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub is_admin: bool,
    pub token: String,
}

impl CurrentUser {
    pub fn user_id(&self) -> UserId {
        UserId::new(self.id.clone())
    }

    fn from_session(session: Session) -> Self {
        let is_admin = session.user.is_admin();
        CurrentUser {
            id: session.user.user_id,
            full_name: session.user.full_name,
            email: session.user.email,
            is_admin,
            token: session.token,
        }
    }
}

/// Extractor that requires authentication.
/// Returns 401 if no valid session found.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_session_token(parts, &state.config.auth.cookie_name)
            .ok_or(AppError::Unauthorized)?;

        state
            .identity
            .current(token)
            .await?
            .map(CurrentUser::from_session)
            .ok_or(AppError::Unauthorized)
    }
}

/// Optional user extractor. Returns None instead of 401 when not authenticated.
pub struct MaybeUser(pub Option<CurrentUser>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(AppError::Unauthorized) => Ok(MaybeUser(None)),
            Err(e) => Err(e),
        }
    }
}

/// Extractor that requires an admin session. 401 when signed out, 403 for
/// non-admins.
pub struct AdminUser(pub CurrentUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            tracing::warn!("Non-admin {} attempted a moderation request", user.id);
            return Err(AppError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

/// Session token from the session cookie, or from an `Authorization: Bearer`
/// header for non-browser clients.
pub fn extract_session_token<'a>(parts: &'a Parts, cookie_name: &str) -> Option<&'a str> {
    let from_cookie = parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == cookie_name && !val.is_empty() {
                Some(val)
            } else {
                None
            }
        });

    from_cookie.or_else(|| {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn reads_named_cookie() {
        let parts = parts(&[("cookie", "theme=dark; civicpulse_session=abc123")]);
        assert_eq!(
            extract_session_token(&parts, "civicpulse_session"),
            Some("abc123")
        );
    }

    #[test]
    fn falls_back_to_bearer_header() {
        let parts = parts(&[("authorization", "Bearer tok")]);
        assert_eq!(extract_session_token(&parts, "civicpulse_session"), Some("tok"));
    }

    #[test]
    fn empty_cookie_is_ignored() {
        let parts = parts(&[("cookie", "civicpulse_session=")]);
        assert_eq!(extract_session_token(&parts, "civicpulse_session"), None);
    }
}
