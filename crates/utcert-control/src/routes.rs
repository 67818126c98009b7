use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    middleware,
    routing::{delete, get, post, put},
};
use serde::Serialize;

use crate::state::AppState;
use crate::{auth, certificate_queries, certificates, contacts, dashboard, security, users};

/// Spreadsheets and attachments arrive as multipart bodies.
const UPLOAD_BODY_LIMIT: usize = 20 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
    database: bool,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthzResponse> {
    let database = match state.db.ping().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(%err, "database ping failed");
            false
        }
    };
    Json(HealthzResponse {
        status: if database { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
    })
}

pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/healthz", get(healthz))
        .route("/user/register", post(users::register_handler))
        .route("/user/exists/:stake_id", get(users::exists_handler))
        .route(
            "/certificate/check-legal/:identity_number",
            get(certificates::check_legal_handler),
        );

    // Cookie-bearing session routes sit behind the Origin allowlist.
    let revoke = Router::new()
        .route("/user/revoke-token", post(auth::revoke_token))
        .route_layer(middleware::from_fn_with_state(state.clone(), security::require_user));
    let session = Router::new()
        .route("/user/authenticate", post(auth::authenticate))
        .route("/user/refresh-token", post(auth::refresh_token))
        .merge(revoke)
        .layer(middleware::from_fn_with_state(state.clone(), security::origin_guard));

    let protected = Router::new()
        .route("/user", get(users::list_handler))
        .route("/user/me", get(users::me))
        .route("/home", get(dashboard::summary_handler))
        .route("/certificate/create", post(certificates::create_handler))
        .route(
            "/certificate/create-from-excel",
            post(certificates::create_from_excel_handler),
        )
        .route(
            "/certificate/get-certificate-issued",
            post(certificate_queries::list_issued_handler),
        )
        .route(
            "/certificate/get-certificate-received",
            post(certificate_queries::list_received_handler),
        )
        .route("/certificate/sign-certificate", post(certificates::sign_handler))
        .route(
            "/certificate/sign-multiple-certificates",
            post(certificates::sign_many_handler),
        )
        .route("/certificate/send-certificate", post(certificates::send_handler))
        .route(
            "/certificate/send-multiple-certificates",
            post(certificates::send_many_handler),
        )
        .route("/certificate/ban-certificate", post(certificates::ban_handler))
        .route(
            "/certificate/ban-multiple-certificates",
            post(certificates::ban_many_handler),
        )
        .route(
            "/certificate/upload-attachment",
            post(certificates::upload_attachment_handler),
        )
        .route(
            "/certificate/delete-multiple-cert",
            post(certificates::delete_many_handler),
        )
        .route("/certificate/:id", delete(certificates::delete_handler))
        .route("/contact/get-contacts", post(contacts::list_handler))
        .route("/contact/create", post(contacts::create_handler))
        .route("/contact/update-status", put(contacts::update_status_handler))
        .route("/contact/:id", delete(contacts::delete_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), security::require_user))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT));

    Router::new()
        .merge(public)
        .merge(session)
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), security::request_id))
        .with_state(state)
}
