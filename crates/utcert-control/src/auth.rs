use axum::{Extension, Json, extract::State};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use utcert_db::entities::refresh_tokens;
use utcert_db::sea_orm::{Set, prelude::Uuid};

use crate::error::{ApiError, ApiResponse, ServiceError};
use crate::request_meta::{ApiJson, RequestMeta};
use crate::security::CurrentUser;
use crate::sessions::{self, Session};
use crate::state::AppState;
use crate::users::UserView;

pub const ACCESS_TOKEN_MINUTES: i64 = 15;
pub const REFRESH_TOKEN_DAYS: i64 = 7;
pub const REFRESH_COOKIE_NAME: &str = "refreshToken";
const REFRESH_COOKIE_PATH: &str = "/user";
const REFRESH_TOKEN_BYTES: usize = 64;

const JWT_ISSUER: &str = "utcert";
const JWT_AUDIENCE: &str = "utcert-web";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
    iat: usize,
    iss: String,
    aud: String,
}

/// A freshly minted refresh token, not yet bound to a user.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub token: String,
    pub expires: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub created_by_ip: String,
}

impl NewRefreshToken {
    pub fn into_active_model(self, user_id: Uuid) -> refresh_tokens::ActiveModel {
        refresh_tokens::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            token: Set(self.token),
            expires: Set(self.expires.into()),
            created: Set(self.created.into()),
            created_by_ip: Set(self.created_by_ip),
            revoked: Set(None),
            revoked_by_ip: Set(None),
            replaced_by_token: Set(None),
            reason_revoked: Set(None),
        }
    }
}

/// Mints and checks access tokens (HS256) and mints refresh tokens.
pub struct TokenAuthority {
    encoding: jsonwebtoken::EncodingKey,
    decoding: jsonwebtoken::DecodingKey,
}

impl TokenAuthority {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: jsonwebtoken::EncodingKey::from_secret(secret),
            decoding: jsonwebtoken::DecodingKey::from_secret(secret),
        }
    }

    pub fn generate_access_token(&self, user_id: Uuid) -> jsonwebtoken::errors::Result<String> {
        let now = time::OffsetDateTime::now_utc();
        let exp = now + time::Duration::minutes(ACCESS_TOKEN_MINUTES);
        self.encode(user_id, now.unix_timestamp(), exp.unix_timestamp())
    }

    fn encode(&self, user_id: Uuid, iat: i64, exp: i64) -> jsonwebtoken::errors::Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: exp as usize,
            iat: iat as usize,
            iss: JWT_ISSUER.to_string(),
            aud: JWT_AUDIENCE.to_string(),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &self.encoding,
        )
    }

    /// Returns the user id of a valid token. A token is already expired at
    /// the second named by `exp`.
    pub fn validate_access_token(&self, token: &str) -> Option<Uuid> {
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_audience(&[JWT_AUDIENCE]);
        validation.set_issuer(&[JWT_ISSUER]);
        validation.leeway = 0;

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation).ok()?;

        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        if now >= data.claims.exp as i64 {
            return None;
        }
        Uuid::parse_str(&data.claims.sub).ok()
    }

    pub fn generate_refresh_token(&self, ip: &str) -> NewRefreshToken {
        use rand::RngCore;
        let mut buf = [0u8; REFRESH_TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut buf);

        let created = Utc::now();
        NewRefreshToken {
            token: hex::encode_upper(buf),
            expires: created + chrono::Duration::days(REFRESH_TOKEN_DAYS),
            created,
            created_by_ip: ip.to_string(),
        }
    }
}

fn refresh_cookie(value: String) -> Cookie<'static> {
    let mut c = Cookie::new(REFRESH_COOKIE_NAME, value);
    c.set_http_only(true);
    c.set_same_site(SameSite::Lax);
    c.set_path(REFRESH_COOKIE_PATH);
    c.set_max_age(time::Duration::days(REFRESH_TOKEN_DAYS));
    c
}

fn clear_refresh_cookie() -> Cookie<'static> {
    let mut c = Cookie::new(REFRESH_COOKIE_NAME, "");
    c.set_path(REFRESH_COOKIE_PATH);
    c.make_removal();
    c
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    pub stake_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeTokenRequest {
    pub token: Option<String>,
}

/// Login/refresh payload. The refresh token only travels in the cookie.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    #[serde(flatten)]
    pub user: UserView,
    pub jwt_token: String,
}

fn session_response(
    jar: CookieJar,
    session: Session,
) -> (CookieJar, Json<ApiResponse<SessionView>>) {
    let jar = jar.add(refresh_cookie(session.refresh_token));
    let view = SessionView {
        user: UserView::from(&session.user),
        jwt_token: session.access_token,
    };
    (jar, ApiResponse::ok(view))
}

pub async fn authenticate(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    jar: CookieJar,
    ApiJson(input): ApiJson<AuthenticateRequest>,
) -> Result<(CookieJar, Json<ApiResponse<SessionView>>), ApiError> {
    let session = sessions::authenticate(
        &state.db,
        &state.tokens,
        state.config.refresh_token_ttl_days,
        input.stake_id.trim(),
        &meta.ip,
    )
    .await
    .map_err(|e| meta.fail(e))?;

    tracing::info!(user_id = %session.user.id, ip = %meta.ip, "user authenticated");
    Ok(session_response(jar, session))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiResponse<SessionView>>), ApiError> {
    let token = match jar.get(REFRESH_COOKIE_NAME) {
        Some(c) if !c.value().is_empty() => c.value().to_string(),
        _ => return Err(meta.fail(ServiceError::Auth("Token is required".into()))),
    };

    match sessions::rotate(
        &state.db,
        &state.tokens,
        state.config.refresh_token_ttl_days,
        &token,
        &meta.ip,
    )
    .await
    {
        Ok(session) => Ok(session_response(jar, session)),
        Err(e) => Err(meta.fail(e)),
    }
}

pub async fn revoke_token(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    jar: CookieJar,
    input: Option<Json<RevokeTokenRequest>>,
) -> Result<(CookieJar, Json<ApiResponse<bool>>), ApiError> {
    let from_body = input
        .and_then(|Json(r)| r.token)
        .filter(|t| !t.trim().is_empty());
    let from_cookie = jar.get(REFRESH_COOKIE_NAME).map(|c| c.value().to_string());
    let revoking_own_cookie = from_body.is_none();

    let token = match from_body.or(from_cookie).filter(|t| !t.is_empty()) {
        Some(t) => t,
        None => return Err(meta.fail(ServiceError::Validation("Token is required".into()))),
    };

    let owner = (!user.is_admin()).then_some(user.id);
    sessions::revoke(&state.db, &token, &meta.ip, owner)
        .await
        .map_err(|e| meta.fail(e))?;

    let jar = if revoking_own_cookie {
        jar.remove(clear_refresh_cookie())
    } else {
        jar
    };
    Ok((jar, ApiResponse::ok(true)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> TokenAuthority {
        TokenAuthority::new(b"test-secret")
    }

    #[test]
    fn access_token_round_trips_user_id() {
        let tokens = authority();
        let user_id = Uuid::new_v4();
        let jwt = tokens.generate_access_token(user_id).unwrap();
        assert_eq!(tokens.validate_access_token(&jwt), Some(user_id));
    }

    #[test]
    fn token_expiring_now_is_rejected() {
        let tokens = authority();
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let jwt = tokens.encode(Uuid::new_v4(), now - 60, now).unwrap();
        assert_eq!(tokens.validate_access_token(&jwt), None);

        let still_valid = tokens.encode(Uuid::new_v4(), now, now + 60).unwrap();
        assert!(tokens.validate_access_token(&still_valid).is_some());
    }

    #[test]
    fn foreign_or_malformed_tokens_are_rejected() {
        let jwt = TokenAuthority::new(b"other-secret")
            .generate_access_token(Uuid::new_v4())
            .unwrap();
        assert_eq!(authority().validate_access_token(&jwt), None);
        assert_eq!(authority().validate_access_token("not-a-jwt"), None);
        assert_eq!(authority().validate_access_token(""), None);
    }

    #[test]
    fn refresh_tokens_are_long_uppercase_hex() {
        let tokens = authority();
        let a = tokens.generate_refresh_token("10.0.0.1");
        let b = tokens.generate_refresh_token("10.0.0.1");

        assert_eq!(a.token.len(), REFRESH_TOKEN_BYTES * 2);
        assert!(a.token.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        assert_ne!(a.token, b.token);
        assert_eq!(a.expires - a.created, chrono::Duration::days(REFRESH_TOKEN_DAYS));
        assert_eq!(a.created_by_ip, "10.0.0.1");
    }

    #[test]
    fn refresh_cookie_is_http_only_and_scoped() {
        let c = refresh_cookie("ABC".into());
        assert_eq!(c.name(), REFRESH_COOKIE_NAME);
        assert_eq!(c.http_only(), Some(true));
        assert_eq!(c.path(), Some(REFRESH_COOKIE_PATH));
        assert_eq!(c.max_age(), Some(time::Duration::days(REFRESH_TOKEN_DAYS)));
    }
}
