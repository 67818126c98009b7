use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Method, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sea_orm::EntityTrait;

use utcert_db::entities::users;

use crate::error::ServiceError;
use crate::request_meta::RequestMeta;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The authenticated caller, inserted by `require_user`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub users::Model);

/// Peer address of the connection. `X-Forwarded-For` is only honoured when
/// the service is configured to sit behind a proxy.
fn client_ip(req: &Request<Body>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// Middleware: attach RequestMeta and echo the request id back.
pub async fn request_id(State(state): State<AppState>, mut req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(|v| v.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let meta = RequestMeta {
        request_id: request_id.clone(),
        ip: client_ip(&req, state.config.trust_forwarded_for),
    };
    req.extensions_mut().insert(meta);

    let mut resp = next.run(req).await;
    if let Ok(v) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    resp
}

fn meta_of(req: &Request<Body>) -> RequestMeta {
    req.extensions()
        .get::<RequestMeta>()
        .cloned()
        .unwrap_or_else(|| RequestMeta {
            request_id: uuid::Uuid::new_v4().to_string(),
            ip: "unknown".to_string(),
        })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

// Middleware: bearer access token -> CurrentUser.
pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let meta = meta_of(&req);
    let unauthorized = || meta.fail(ServiceError::Auth("Unauthorized".into())).into_response();

    let user_id = match bearer_token(req.headers()).and_then(|t| state.tokens.validate_access_token(t)) {
        Some(id) => id,
        None => return unauthorized(),
    };

    let user = match users::Entity::find_by_id(user_id).one(&*state.db).await {
        Ok(Some(u)) if !u.is_deleted => u,
        Ok(_) => return unauthorized(),
        Err(e) => return meta.fail(ServiceError::Database(e)).into_response(),
    };

    req.extensions_mut().insert(CurrentUser(user));
    next.run(req).await
}

fn is_unsafe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn origin_is_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    // Treat missing Origin as a non-browser client (curl, service-to-service).
    let origin = match headers.get(header::ORIGIN) {
        Some(v) => match v.to_str() {
            Ok(s) => s,
            Err(_) => return false,
        },
        None => return true,
    };
    allowed.iter().any(|a| a == origin)
}

// Middleware: Origin allowlist for the cookie-bearing session routes.
pub async fn origin_guard(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    if is_unsafe_method(req.method()) && !origin_is_allowed(req.headers(), &state.config.allowed_origins) {
        let meta = meta_of(&req);
        return meta
            .fail(ServiceError::Forbidden("origin not allowed".into()))
            .into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(k.clone(), HeaderValue::from_str(v).unwrap());
        }
        h
    }

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        assert_eq!(
            bearer_token(&headers(&[(header::AUTHORIZATION, "Bearer abc.def")])),
            Some("abc.def")
        );
        assert_eq!(bearer_token(&headers(&[(header::AUTHORIZATION, "Basic abc")])), None);
        assert_eq!(bearer_token(&headers(&[(header::AUTHORIZATION, "Bearer   ")])), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn origin_allowlist_matches_exactly() {
        let allowed = vec!["https://app.example".to_string()];
        assert!(origin_is_allowed(&HeaderMap::new(), &allowed));
        assert!(origin_is_allowed(&headers(&[(header::ORIGIN, "https://app.example")]), &allowed));
        assert!(!origin_is_allowed(&headers(&[(header::ORIGIN, "https://evil.example")]), &allowed));
    }

    fn from_peer(forwarded: &str) -> Request<Body> {
        let mut req = Request::builder()
            .header("x-forwarded-for", forwarded)
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("198.51.100.4:50000".parse::<SocketAddr>().unwrap()));
        req
    }

    #[test]
    fn forwarded_for_is_ignored_unless_trusted() {
        let req = from_peer("203.0.113.7, 10.0.0.1");
        assert_eq!(client_ip(&req, false), "198.51.100.4");
        assert_eq!(client_ip(&req, true), "203.0.113.7");

        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&bare, true), "unknown");
    }
}
