use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;

use utcert_core::{StudyMode, format_code};

/// Printed fields of a certificate other than the two party names.
#[derive(Debug, Clone)]
pub struct CertificateMetadata {
    pub certificate_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub graduation_year: i32,
    pub classification: String,
    pub study_mode: StudyMode,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template {path}: {source}")]
    Template {
        path: String,
        source: std::io::Error,
    },
    #[error("write image: {0}")]
    Write(#[from] std::io::Error),
}

#[async_trait]
pub trait CertificateRenderer: Send + Sync {
    /// Draws the certificate into a fresh file and returns its path.
    async fn render(
        &self,
        issuer_name: &str,
        receiver_name: &str,
        metadata: &CertificateMetadata,
        code: i64,
    ) -> Result<PathBuf, RenderError>;
}

const DEFAULT_TEMPLATE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="928" height="648" viewBox="0 0 928 648">
  <rect width="928" height="648" fill="#fdfbf4"/>
  <rect x="24" y="24" width="880" height="600" fill="none" stroke="#2f4f4f" stroke-width="4"/>
  <g font-family="Georgia, serif" fill="#2f4f4f">
    <text x="464" y="74" font-size="24" text-anchor="middle">{{issuer_name}}</text>
    <text x="464" y="180" font-size="36" text-anchor="middle">CERTIFICATE</text>
    <text x="464" y="310" font-size="56" text-anchor="middle">{{receiver_name}}</text>
    <text x="180" y="390" font-size="18">Certificate Name: {{certificate_name}}</text>
    <text x="570" y="390" font-size="18">Date Of Birth: {{date_of_birth}}</text>
    <text x="180" y="440" font-size="18">Year Of Graduation: {{graduation_year}}</text>
    <text x="180" y="490" font-size="18">Classification: {{classification}}</text>
    <text x="180" y="540" font-size="18">Mode Of Study: {{study_mode}}</text>
    <text x="140" y="600" font-size="15">Certificate number: {{code}}</text>
  </g>
</svg>
"##;

pub fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() && c != '\t' => {}
            c => out.push(c),
        }
    }
    out
}

/// Fills an SVG template. Placeholders are `{{name}}`; unknown ones are left
/// as they are.
pub struct SvgRenderer {
    temp_dir: PathBuf,
    template: String,
}

impl SvgRenderer {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }

    pub async fn with_template_file(
        temp_dir: impl Into<PathBuf>,
        template: &Path,
    ) -> Result<Self, RenderError> {
        let template = tokio::fs::read_to_string(template)
            .await
            .map_err(|source| RenderError::Template {
                path: template.display().to_string(),
                source,
            })?;
        Ok(Self {
            temp_dir: temp_dir.into(),
            template,
        })
    }

    pub fn fill(
        &self,
        issuer_name: &str,
        receiver_name: &str,
        metadata: &CertificateMetadata,
        code: i64,
    ) -> String {
        let dob = metadata
            .date_of_birth
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_default();
        let fields = [
            ("issuer_name", issuer_name.to_string()),
            ("receiver_name", receiver_name.to_string()),
            ("certificate_name", metadata.certificate_name.clone()),
            ("date_of_birth", dob),
            ("graduation_year", metadata.graduation_year.to_string()),
            ("classification", metadata.classification.clone()),
            ("study_mode", metadata.study_mode.to_string()),
            ("code", format_code(code)),
        ];

        let mut out = self.template.clone();
        for (name, value) in fields {
            out = out.replace(&format!("{{{{{name}}}}}"), &escape_xml(&value));
        }
        out
    }
}

#[async_trait]
impl CertificateRenderer for SvgRenderer {
    async fn render(
        &self,
        issuer_name: &str,
        receiver_name: &str,
        metadata: &CertificateMetadata,
        code: i64,
    ) -> Result<PathBuf, RenderError> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        // Unique per call: concurrent renders of the same code must not collide.
        let path = self.temp_dir.join(format!(
            "Cert_{}_{}.svg",
            format_code(code),
            uuid::Uuid::new_v4().simple()
        ));
        let svg = self.fill(issuer_name, receiver_name, metadata, code);
        tokio::fs::write(&path, svg).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> CertificateMetadata {
        CertificateMetadata {
            certificate_name: "Bachelor of Science".into(),
            date_of_birth: NaiveDate::from_ymd_opt(2001, 3, 9),
            graduation_year: 2024,
            classification: "Excellent".into(),
            study_mode: StudyMode::FullTime,
        }
    }

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(
            escape_xml(r#"Tom & "Jerry" <script>'x'"#),
            "Tom &amp; &quot;Jerry&quot; &lt;script&gt;&apos;x&apos;"
        );
        assert_eq!(escape_xml("a\u{0}b"), "ab");
    }

    #[test]
    fn fill_prints_every_field() {
        let svg = SvgRenderer::new("/unused").fill("Uni <A>", "Bob", &metadata(), 42);
        assert!(svg.contains("Uni &lt;A&gt;"));
        assert!(svg.contains(">Bob<"));
        assert!(svg.contains("Date Of Birth: 09/03/2001"));
        assert!(svg.contains("Mode Of Study: FullTime"));
        assert!(svg.contains("Certificate number: 000042"));
        assert!(!svg.contains("{{"));
    }

    #[tokio::test]
    async fn render_writes_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = SvgRenderer::new(dir.path().join("renders"));

        let a = renderer.render("Uni", "Bob", &metadata(), 7).await.unwrap();
        let b = renderer.render("Uni", "Bob", &metadata(), 7).await.unwrap();
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("Cert_000007_"));

        let body = std::fs::read_to_string(&a).unwrap();
        assert!(body.starts_with("<svg"));
    }

    #[tokio::test]
    async fn custom_template_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let tpl = dir.path().join("tpl.svg");
        std::fs::write(&tpl, "<svg>{{receiver_name}}|{{code}}|{{unknown}}</svg>").unwrap();

        let renderer = SvgRenderer::with_template_file(dir.path(), &tpl).await.unwrap();
        assert_eq!(
            renderer.fill("Uni", "Bob", &metadata(), 3),
            "<svg>Bob|000003|{{unknown}}</svg>"
        );

        let missing = SvgRenderer::with_template_file(dir.path(), &dir.path().join("nope.svg")).await;
        assert!(matches!(missing, Err(RenderError::Template { .. })));
    }
}
