//! Bulk certificate requests from an xlsx workbook.
//!
//! First worksheet, one certificate per row from row 2, twelve columns:
//! stake id, wallet, identity number, certificate name, receiver name,
//! date of birth (`dd/MM/yyyy`), graduation year, classification, study mode,
//! signing type (`Multiple Sign` selects multi-party signing), signer
//! addresses (comma separated) and attachment path.
//!
//! Attachment paths are relative to the configured import directory; nothing
//! outside it is ever read.

use std::io::Cursor;
use std::path::{Component, Path};

use calamine::{Data, Reader, Xlsx};
use chrono::NaiveDate;

use utcert_core::{SigningType, StudyMode};

use crate::certificates::{AttachmentFile, CreateCertificateRequest};
use crate::error::{ServiceError, ServiceResult};

pub const COLUMNS: usize = 12;
const MULTIPLE_SIGN_MARKER: &str = "Multiple Sign";

/// A parsed row together with its 1-based sheet row number.
#[derive(Debug, Clone)]
pub struct ImportedRow {
    pub row: usize,
    pub request: CreateCertificateRequest,
    pub attachment_path: Option<String>,
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_else(|| dt.as_f64().to_string()),
        other => other.to_string().trim().to_string(),
    }
}

fn optional(cell: &str) -> Option<String> {
    let v = cell.trim();
    (!v.is_empty()).then(|| v.to_string())
}

/// Parses one sheet row. Returns `None` for rows without a stake id.
pub fn parse_row(row: usize, cells: &[String; COLUMNS]) -> ServiceResult<Option<ImportedRow>> {
    if cells[0].trim().is_empty() {
        return Ok(None);
    }

    let date_text = cells[5].trim();
    let date_of_birth = NaiveDate::parse_from_str(date_text, "%d/%m/%Y").map_err(|_| {
        ServiceError::Validation(format!("Invalid date of birth '{date_text}' at row {row}"))
    })?;

    let year_text = cells[6].trim();
    let graduation_year = year_text.parse::<i32>().map_err(|_| {
        ServiceError::Validation(format!("Invalid graduation year '{year_text}' at row {row}"))
    })?;

    let mode_text = cells[8].trim();
    let study_mode = mode_text.parse::<StudyMode>().map_err(|_| {
        ServiceError::Validation(format!("Invalid StudyMode value '{mode_text}' at row {row}"))
    })?;

    let signing_type = if cells[9].trim() == MULTIPLE_SIGN_MARKER {
        SigningType::MultipleSigning
    } else {
        SigningType::SingleSigning
    };

    Ok(Some(ImportedRow {
        row,
        request: CreateCertificateRequest {
            stake_id: cells[0].trim().to_string(),
            address_wallet: cells[1].trim().to_string(),
            identity_number: cells[2].trim().to_string(),
            certificate_name: cells[3].trim().to_string(),
            receiver_name: cells[4].trim().to_string(),
            date_of_birth: Some(date_of_birth),
            graduation_year,
            classification: cells[7].trim().to_string(),
            study_mode,
            signing_type,
            signer_address: optional(&cells[10]),
            attachment: None,
        },
        attachment_path: optional(&cells[11]),
    }))
}

pub fn read_workbook(bytes: &[u8]) -> ServiceResult<Vec<ImportedRow>> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
        .map_err(|e| ServiceError::Validation(format!("Not a valid xlsx file: {e}")))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ServiceError::Validation("Workbook has no worksheet".into()))?
        .map_err(|e| ServiceError::Validation(format!("Cannot read worksheet: {e}")))?;

    let Some((last_row, _)) = range.end() else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::new();
    // Absolute 0-based index 1 is sheet row 2; row 1 holds the headers.
    for r in 1..=last_row {
        let cells: [String; COLUMNS] = std::array::from_fn(|c| {
            range
                .get_value((r, c as u32))
                .map(cell_text)
                .unwrap_or_default()
        });
        if let Some(parsed) = parse_row(r as usize + 1, &cells)? {
            rows.push(parsed);
        }
    }
    Ok(rows)
}

/// Reads an attachment named by a spreadsheet row. Only regular files inside
/// `root` are accepted: absolute paths, `..` and symbolic links are rejected.
pub async fn read_attachment(root: Option<&Path>, raw: &str) -> ServiceResult<AttachmentFile> {
    let rejected = |why: &str| ServiceError::Validation(format!("Attachment '{raw}' {why}"));

    let root = root.ok_or_else(|| rejected("cannot be read: no import directory is configured"))?;
    let relative = Path::new(raw.trim());
    let plain = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !plain || relative.as_os_str().is_empty() {
        return Err(rejected("is outside the import directory"));
    }

    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| ServiceError::Internal(format!("import dir {}: {e}", root.display())))?;
    let candidate = root.join(relative);
    let meta = tokio::fs::symlink_metadata(&candidate)
        .await
        .map_err(|_| rejected("cannot be read"))?;
    if meta.file_type().is_symlink() {
        return Err(rejected("is a symbolic link"));
    }
    // A linked parent directory can still lead outside the root.
    let resolved = tokio::fs::canonicalize(&candidate)
        .await
        .map_err(|_| rejected("cannot be read"))?;
    if !resolved.starts_with(&root) {
        return Err(rejected("is outside the import directory"));
    }
    if !meta.is_file() {
        return Err(rejected("is not a regular file"));
    }

    let bytes = tokio::fs::read(&resolved)
        .await
        .map_err(|_| rejected("cannot be read"))?;
    if bytes.is_empty() {
        return Err(rejected("is empty"));
    }
    let file_name = resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    Ok(AttachmentFile { file_name, bytes })
}
