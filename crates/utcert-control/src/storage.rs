//! Upload backends. Both report failure as an empty result: callers decide
//! whether a missing identifier is fatal.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, multipart};
use serde::Deserialize;
use sha1::{Digest, Sha1};

use crate::config::{CloudinaryConfig, PinataConfig};

pub const CERTIFICATE_FOLDER: &str = "certificates";

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Publishes the file and returns its content identifier, or "" on failure.
    async fn upload(&self, path: &Path) -> String;
}

#[async_trait]
pub trait ImageCdn: Send + Sync {
    /// Returns the public https URL, or "" on failure.
    async fn upload(&self, path: &Path, folder: &str) -> String;
    async fn delete(&self, url: &str) -> bool;
}

#[derive(Debug, thiserror::Error)]
enum UploadError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("not configured")]
    NotConfigured,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

fn mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

async fn file_part(path: &Path) -> Result<multipart::Part, UploadError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(multipart::Part::bytes(bytes)
        .file_name(file_name(path))
        .mime_str(mime_type(path))?)
}

async fn with_timeout<F>(backend: &'static str, limit: Duration, fut: F) -> String
where
    F: std::future::Future<Output = Result<String, UploadError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(id)) => id,
        Ok(Err(err)) => {
            tracing::warn!(backend, %err, "upload failed");
            String::new()
        }
        Err(_) => {
            tracing::warn!(backend, timeout_secs = limit.as_secs(), "upload timed out");
            String::new()
        }
    }
}

/// Pinata `pinFileToIPFS` client.
pub struct PinataClient {
    client: Client,
    config: PinataConfig,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PinResponse {
    ipfs_hash: String,
}

impl PinataClient {
    pub fn new(config: PinataConfig, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            config,
            timeout,
        }
    }

    async fn pin(&self, path: &Path) -> Result<String, UploadError> {
        if self.config.jwt.is_empty() {
            return Err(UploadError::NotConfigured);
        }
        let form = multipart::Form::new().part("file", file_part(path).await?);

        let resp = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.jwt)
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(UploadError::Status { status, body });
        }

        let pinned: PinResponse = resp.json().await?;
        Ok(pinned.ipfs_hash)
    }
}

#[async_trait]
impl ContentStore for PinataClient {
    async fn upload(&self, path: &Path) -> String {
        with_timeout("pinata", self.timeout, self.pin(path)).await
    }
}

/// Cloudinary signed upload/destroy client.
pub struct CloudinaryClient {
    client: Client,
    config: CloudinaryConfig,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct CloudinaryUpload {
    secure_url: String,
}

#[derive(Debug, Deserialize)]
struct CloudinaryDestroy {
    result: String,
}

/// Request signature: parameters sorted by name, joined as `k=v&...`, with the
/// API secret appended, SHA-1 hex.
pub fn sign_params(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// `https://res.cloudinary.com/<cloud>/image/upload/v123/<folder>/<id>.png`
/// -> `<folder>/<id>`.
pub fn public_id_from_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/upload/")?;
    let rest = rest.split(['?', '#']).next().unwrap_or_default();

    let mut segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    if segments
        .first()
        .is_some_and(|s| s.len() > 1 && s.starts_with('v') && s[1..].chars().all(|c| c.is_ascii_digit()))
    {
        segments.remove(0);
    }

    let last = segments.pop()?;
    let stem = last.rsplit_once('.').map(|(s, _)| s).unwrap_or(last);
    segments.push(stem);
    let id = segments.join("/");
    (!id.is_empty()).then_some(id)
}

impl CloudinaryClient {
    pub fn new(config: CloudinaryConfig, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            config,
            timeout,
        }
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "https://api.cloudinary.com/v1_1/{}/image/{action}",
            self.config.cloud_name
        )
    }

    fn configured(&self) -> Result<(), UploadError> {
        if self.config.cloud_name.is_empty()
            || self.config.api_key.is_empty()
            || self.config.api_secret.is_empty()
        {
            return Err(UploadError::NotConfigured);
        }
        Ok(())
    }

    async fn push(&self, path: &Path, folder: &str) -> Result<String, UploadError> {
        self.configured()?;
        let public_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signed = [
            ("folder", folder.to_string()),
            ("public_id", public_id),
            ("timestamp", timestamp),
            ("transformation", "q_80".to_string()),
        ];
        let signature = sign_params(&signed, &self.config.api_secret);

        let mut form = multipart::Form::new()
            .part("file", file_part(path).await?)
            .text("api_key", self.config.api_key.clone())
            .text("signature", signature);
        for (k, v) in signed {
            form = form.text(k, v);
        }

        let resp = self.client.post(self.endpoint("upload")).multipart(form).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(UploadError::Status { status, body });
        }
        let uploaded: CloudinaryUpload = resp.json().await?;
        Ok(uploaded.secure_url)
    }

    async fn destroy(&self, public_id: String) -> Result<bool, UploadError> {
        self.configured()?;
        let signed = [
            ("public_id", public_id),
            ("timestamp", chrono::Utc::now().timestamp().to_string()),
        ];
        let signature = sign_params(&signed, &self.config.api_secret);

        let mut form: Vec<(&str, String)> = signed.to_vec();
        form.push(("api_key", self.config.api_key.clone()));
        form.push(("signature", signature));

        let resp = self.client.post(self.endpoint("destroy")).form(&form).send().await?;
        let out: CloudinaryDestroy = resp.json().await?;
        Ok(out.result == "ok")
    }
}

#[async_trait]
impl ImageCdn for CloudinaryClient {
    async fn upload(&self, path: &Path, folder: &str) -> String {
        with_timeout("cloudinary", self.timeout, self.push(path, folder)).await
    }

    async fn delete(&self, url: &str) -> bool {
        let Some(public_id) = public_id_from_url(url) else {
            return false;
        };
        match tokio::time::timeout(self.timeout, self.destroy(public_id)).await {
            Ok(Ok(deleted)) => deleted,
            Ok(Err(err)) => {
                tracing::warn!(backend = "cloudinary", %err, "delete failed");
                false
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_documented_example() {
        let params = [
            ("timestamp", "1315060510".to_string()),
            ("public_id", "sample_image".to_string()),
            ("eager", "w_400,h_300,c_pad|w_260,h_200,c_crop".to_string()),
        ];
        assert_eq!(
            sign_params(&params, "abcd"),
            "bfd09f95f331f558cbd1320e67aa8d488770583e"
        );
    }

    #[test]
    fn public_id_strips_version_and_extension() {
        assert_eq!(
            public_id_from_url("https://res.cloudinary.com/demo/image/upload/v1712/certificates/abc-123.png"),
            Some("certificates/abc-123".to_string())
        );
        assert_eq!(
            public_id_from_url("https://res.cloudinary.com/demo/image/upload/sample.jpg?x=1"),
            Some("sample".to_string())
        );
        assert_eq!(public_id_from_url("https://example.com/a.png"), None);
    }

    #[test]
    fn mime_types_follow_extension() {
        assert_eq!(mime_type(Path::new("/tmp/Cert_000001.svg")), "image/svg+xml");
        assert_eq!(mime_type(Path::new("/tmp/a.PDF")), "application/pdf");
        assert_eq!(mime_type(Path::new("/tmp/noext")), "application/octet-stream");
    }

    #[tokio::test]
    async fn unconfigured_backends_fail_soft() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let pinata = PinataClient::new(
            PinataConfig {
                api_url: "http://127.0.0.1:9".into(),
                jwt: String::new(),
            },
            Duration::from_secs(1),
        );
        assert_eq!(pinata.upload(&path).await, "");

        let cdn = CloudinaryClient::new(
            CloudinaryConfig {
                cloud_name: String::new(),
                api_key: String::new(),
                api_secret: String::new(),
            },
            Duration::from_secs(1),
        );
        assert_eq!(cdn.upload(&path, CERTIFICATE_FOLDER).await, "");
        assert!(!cdn.delete("https://res.cloudinary.com/demo/image/upload/x.png").await);
    }
}
