use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_JWT_SECRET: &str = "dev-insecure-change-me";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:5173,http://127.0.0.1:5173";
const DEFAULT_PINATA_API_URL: &str = "https://api.pinata.cloud/pinning/pinFileToIPFS";

#[derive(Debug, Clone)]
pub struct PinataConfig {
    pub api_url: String,
    pub jwt: String,
}

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind: SocketAddr,
    pub jwt_secret: String,
    /// Inactive refresh tokens older than this are purged on login and rotation.
    pub refresh_token_ttl_days: i64,
    pub allowed_origins: Vec<String>,
    pub temp_dir: PathBuf,
    pub template_path: Option<PathBuf>,
    /// Root for attachment paths named in imported spreadsheets. Unset means
    /// spreadsheet rows cannot reference attachments.
    pub import_dir: Option<PathBuf>,
    /// Take the client address from `X-Forwarded-For`. Only enable behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    pub upload_timeout: Duration,
    pub pinata: PinataConfig,
    pub cloudinary: CloudinaryConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = var("DATABASE_URL").context("DATABASE_URL is required")?;

        let bind = var("UTCERT_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse::<SocketAddr>()
            .context("UTCERT_BIND must be host:port")?;

        let jwt_secret = var("UTCERT_JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("UTCERT_JWT_SECRET is not set; using an insecure development secret");
            DEFAULT_JWT_SECRET.to_string()
        });

        let refresh_token_ttl_days = match var("UTCERT_REFRESH_TOKEN_TTL_DAYS") {
            Some(v) => v
                .parse::<i64>()
                .context("UTCERT_REFRESH_TOKEN_TTL_DAYS must be an integer")?,
            None => 2,
        };

        let upload_timeout_secs = match var("UTCERT_UPLOAD_TIMEOUT_SECS") {
            Some(v) => v
                .parse::<u64>()
                .context("UTCERT_UPLOAD_TIMEOUT_SECS must be an integer")?,
            None => 30,
        };

        Ok(Self {
            database_url,
            bind,
            jwt_secret,
            refresh_token_ttl_days,
            allowed_origins: parse_origins(
                &var("UTCERT_ALLOWED_ORIGINS").unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string()),
            ),
            temp_dir: var("UTCERT_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("utcert")),
            template_path: var("UTCERT_TEMPLATE_PATH").map(PathBuf::from),
            import_dir: var("UTCERT_IMPORT_DIR").map(PathBuf::from),
            trust_forwarded_for: var("UTCERT_TRUST_PROXY")
                .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes")),
            upload_timeout: Duration::from_secs(upload_timeout_secs),
            pinata: PinataConfig {
                api_url: var("PINATA_API_URL").unwrap_or_else(|| DEFAULT_PINATA_API_URL.to_string()),
                jwt: var("PINATA_JWT").unwrap_or_default(),
            },
            cloudinary: CloudinaryConfig {
                cloud_name: var("CLOUDINARY_CLOUD_NAME").unwrap_or_default(),
                api_key: var("CLOUDINARY_API_KEY").unwrap_or_default(),
                api_secret: var("CLOUDINARY_API_SECRET").unwrap_or_default(),
            },
        })
    }
}

// Examples:
// - UTCERT_ALLOWED_ORIGINS=http://localhost:5173
// - UTCERT_ALLOWED_ORIGINS=https://app.example.com,https://admin.example.com
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn database_url_is_required() {
        let err = config(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn defaults_fill_optional_settings() {
        let cfg = config(&[("DATABASE_URL", "sqlite::memory:")]).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.refresh_token_ttl_days, 2);
        assert_eq!(cfg.upload_timeout, Duration::from_secs(30));
        assert_eq!(cfg.allowed_origins.len(), 2);
        assert!(cfg.template_path.is_none());
        assert!(cfg.import_dir.is_none());
        assert!(!cfg.trust_forwarded_for);
        assert_eq!(cfg.pinata.api_url, DEFAULT_PINATA_API_URL);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://db/utcert"),
            ("UTCERT_BIND", "127.0.0.1:9000"),
            ("UTCERT_REFRESH_TOKEN_TTL_DAYS", "5"),
            ("UTCERT_ALLOWED_ORIGINS", " https://a.example , ,https://b.example"),
            ("UTCERT_UPLOAD_TIMEOUT_SECS", "3"),
            ("UTCERT_IMPORT_DIR", "/srv/utcert/import"),
            ("UTCERT_TRUST_PROXY", "true"),
        ])
        .unwrap();
        assert_eq!(cfg.import_dir, Some(PathBuf::from("/srv/utcert/import")));
        assert!(cfg.trust_forwarded_for);
        assert_eq!(cfg.bind.port(), 9000);
        assert_eq!(cfg.refresh_token_ttl_days, 5);
        assert_eq!(cfg.allowed_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(cfg.upload_timeout, Duration::from_secs(3));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert!(config(&[("DATABASE_URL", "x"), ("UTCERT_REFRESH_TOKEN_TTL_DAYS", "two")]).is_err());
        assert!(config(&[("DATABASE_URL", "x"), ("UTCERT_BIND", "nope")]).is_err());
    }
}
