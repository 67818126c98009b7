use std::sync::Arc;

use utcert_db::sea_orm::DatabaseConnection;

use crate::auth::TokenAuthority;
use crate::config::Config;
use crate::render::CertificateRenderer;
use crate::storage::{ContentStore, ImageCdn};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<Config>,
    pub tokens: Arc<TokenAuthority>,
    pub content_store: Arc<dyn ContentStore>,
    pub image_cdn: Arc<dyn ImageCdn>,
    pub renderer: Arc<dyn CertificateRenderer>,
}
