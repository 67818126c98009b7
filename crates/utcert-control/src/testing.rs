//! Shared fixtures for unit tests: a migrated in-memory database, seeded
//! users and upload backends that never leave the process.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set, prelude::Uuid};
use sea_orm_migration::MigratorTrait;
use sha1::{Digest, Sha1};
use tempfile::TempDir;

use utcert_core::Role;
use utcert_db::entities::users;
use utcert_migration::Migrator;

use crate::auth::TokenAuthority;
use crate::config::Config;
use crate::render::SvgRenderer;
use crate::state::AppState;
use crate::storage::{ContentStore, ImageCdn};

pub const TEST_JWT_SECRET: &[u8] = b"test-secret";

pub async fn test_db() -> DatabaseConnection {
    // One connection: every pooled handle must see the same in-memory database.
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

pub async fn seed_user(db: &DatabaseConnection, stake_id: &str, name: &str, address: &str) -> users::Model {
    seed_user_with_role(db, stake_id, name, address, Role::User).await
}

pub async fn seed_admin(db: &DatabaseConnection, stake_id: &str) -> users::Model {
    seed_user_with_role(db, stake_id, "Admin", &format!("addr-{stake_id}"), Role::Admin).await
}

async fn seed_user_with_role(
    db: &DatabaseConnection,
    stake_id: &str,
    name: &str,
    address: &str,
    role: Role,
) -> users::Model {
    users::ActiveModel {
        id: Set(Uuid::new_v4()),
        stake_id: Set(stake_id.to_string()),
        name: Set(name.to_string()),
        receive_address: Set(address.to_string()),
        avatar_uri: Set(None),
        role: Set(role.as_i16()),
        is_verified: Set(true),
        is_deleted: Set(false),
        created_date: Set(Utc::now().into()),
        modified_date: Set(None),
    }
    .insert(db)
    .await
    .unwrap()
}

/// Content-addressed like IPFS: the same bytes always get the same cid.
#[derive(Default)]
pub struct FakeStore {
    pub uploads: AtomicUsize,
    /// Uploads accepted before every later one fails.
    accept: Option<usize>,
}

impl FakeStore {
    pub fn failing() -> Self {
        Self::failing_after(0)
    }

    pub fn failing_after(accepted: usize) -> Self {
        Self {
            accept: Some(accepted),
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for FakeStore {
    async fn upload(&self, path: &Path) -> String {
        let Ok(bytes) = tokio::fs::read(path).await else {
            return String::new();
        };
        if self.accept.is_some_and(|limit| self.uploads() >= limit) {
            return String::new();
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        format!("Qm{}", &hex::encode(Sha1::digest(&bytes))[..20])
    }
}

#[derive(Default)]
pub struct FakeCdn {
    pub uploads: AtomicUsize,
    pub deletes: AtomicUsize,
    fail: bool,
}

impl FakeCdn {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageCdn for FakeCdn {
    async fn upload(&self, path: &Path, folder: &str) -> String {
        if self.fail || tokio::fs::metadata(path).await.is_err() {
            return String::new();
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        format!("https://res.cloudinary.com/test/image/upload/v1/{folder}/img{n}.svg")
    }

    async fn delete(&self, _url: &str) -> bool {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Application state over fakes. Holds the temp directory open for the test.
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<FakeStore>,
    pub cdn: Arc<FakeCdn>,
    pub dir: TempDir,
}

pub async fn test_app() -> TestApp {
    test_app_with(FakeStore::default(), FakeCdn::default()).await
}

pub async fn test_app_with(store: FakeStore, cdn: FakeCdn) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let temp = dir.path().join("work").display().to_string();
    let config = Config::from_lookup(|key| match key {
        "DATABASE_URL" => Some("sqlite::memory:".to_string()),
        "UTCERT_TEMP_DIR" => Some(temp.clone()),
        "UTCERT_JWT_SECRET" => Some(String::from_utf8_lossy(TEST_JWT_SECRET).into_owned()),
        "UTCERT_ALLOWED_ORIGINS" => Some("https://app.example".to_string()),
        _ => None,
    })
    .unwrap();

    let store = Arc::new(store);
    let cdn = Arc::new(cdn);
    let state = AppState {
        db: Arc::new(test_db().await),
        tokens: Arc::new(TokenAuthority::new(TEST_JWT_SECRET)),
        content_store: store.clone(),
        image_cdn: cdn.clone(),
        renderer: Arc::new(SvgRenderer::new(config.temp_dir.clone())),
        config: Arc::new(config),
    };
    TestApp { state, store, cdn, dir }
}
