//! Certificate lifecycle: create, sign, send, ban, delete and attachments.
//!
//! No transaction is held across a render or an upload. Codes are reserved
//! in their own short transaction; rows are written in a second one.

use std::collections::HashMap;
use std::path::Path as FsPath;

use axum::{
    Extension,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::header,
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set, TransactionTrait,
    prelude::{DateTimeWithTimeZone, Uuid},
    sea_query::Expr,
};
use serde::Deserialize;

use utcert_core::{
    AttachmentDescriptor, CertificateStatus, ContactStatus, Roster, SignerState, SigningType,
    StudyMode, fingerprint, parse_signer_addresses,
};
use utcert_db::entities::{certificates, contacts, sequences, users};

use crate::error::{ApiResponse, ApiResult, ServiceError, ServiceResult};
use crate::import::{self, ImportedRow};
use crate::render::CertificateMetadata;
use crate::request_meta::{ApiJson, RequestMeta};
use crate::security::CurrentUser;
use crate::state::AppState;
use crate::storage::CERTIFICATE_FOLDER;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCertificateRequest {
    /// Receiver's stake id.
    pub stake_id: String,
    #[serde(default)]
    pub address_wallet: String,
    #[serde(default)]
    pub identity_number: String,
    pub certificate_name: String,
    /// Name printed on the image. The stored receiver name comes from the
    /// receiver's account.
    pub receiver_name: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    pub graduation_year: i32,
    #[serde(default)]
    pub classification: String,
    pub study_mode: StudyMode,
    #[serde(default)]
    pub signing_type: SigningType,
    /// Comma separated receive addresses of the co-signers.
    #[serde(default)]
    pub signer_address: Option<String>,
    /// File published alongside the certificate. Filled from a multipart
    /// `file` part or an import-directory file, never from the JSON body.
    #[serde(skip)]
    pub attachment: Option<AttachmentFile>,
}

#[derive(Debug, Clone)]
pub struct AttachmentFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignCertificateRequest {
    pub certificate_id: Uuid,
    pub issuer_address: String,
    #[serde(default)]
    pub sign_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateIdRequest {
    pub id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanCertificateRequest {
    pub id: Uuid,
    #[serde(default)]
    pub note: Option<String>,
}

fn not_found() -> ServiceError {
    ServiceError::NotFound("Certificate not found".into())
}

fn non_blank(value: &str) -> Option<String> {
    let v = value.trim();
    (!v.is_empty()).then(|| v.to_string())
}

fn ensure_issuer(actor: &users::Model, cert: &certificates::Model) -> ServiceResult<()> {
    if actor.is_admin() || cert.issuer_id == actor.id {
        return Ok(());
    }
    Err(ServiceError::Forbidden(
        "Only the issuer can change this certificate".into(),
    ))
}

async fn remove_temp(path: &FsPath) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), %err, "temp file not removed");
    }
}

// ---- creation ----

/// A create request with every lookup done, ready to render and publish.
struct Prepared {
    input: CreateCertificateRequest,
    receiver: users::Model,
    roster: Option<Roster>,
    attachment: Option<AttachmentFile>,
}

async fn resolve_roster(db: &DatabaseConnection, raw: Option<&str>) -> ServiceResult<Roster> {
    let addresses = parse_signer_addresses(raw);
    if addresses.is_empty() {
        return Err(ServiceError::Validation(
            "The designated signer is missing.".into(),
        ));
    }

    let signers = users::Entity::find()
        .filter(users::Column::ReceiveAddress.is_in(addresses.clone()))
        .filter(users::Column::IsDeleted.eq(false))
        .all(db)
        .await?;

    let mut entries = Vec::with_capacity(addresses.len());
    for address in addresses {
        let signer = signers
            .iter()
            .find(|u| u.receive_address == address)
            .ok_or_else(|| ServiceError::NotFound(format!("Signer not found: {address}")))?;
        let name = signer.name.clone();
        entries.push(SignerState::unsigned(address, name));
    }
    Ok(Roster::new(entries))
}

async fn prepare(db: &DatabaseConnection, mut input: CreateCertificateRequest) -> ServiceResult<Prepared> {
    if input.certificate_name.trim().is_empty() {
        return Err(ServiceError::Validation("certificateName is required".into()));
    }

    let receiver = users::Entity::find()
        .filter(users::Column::StakeId.eq(input.stake_id.trim()))
        .filter(users::Column::IsDeleted.eq(false))
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Receiver not found: {}", input.stake_id.trim())))?;

    let roster = match input.signing_type {
        SigningType::SingleSigning => None,
        SigningType::MultipleSigning => {
            Some(resolve_roster(db, input.signer_address.as_deref()).await?)
        }
    };

    let attachment = input.attachment.take();
    if let Some(file) = attachment.as_ref().filter(|f| f.bytes.is_empty()) {
        return Err(ServiceError::Validation(format!(
            "Attachment '{}' is empty",
            file.file_name
        )));
    }

    Ok(Prepared {
        input,
        receiver,
        roster,
        attachment,
    })
}

/// Takes the next certificate code. Commits on its own so a slow render
/// never holds the counter row.
pub async fn reserve_code(db: &DatabaseConnection) -> ServiceResult<i64> {
    let txn = db.begin().await?;
    let bumped = sequences::Entity::update_many()
        .col_expr(
            sequences::Column::Value,
            Expr::col(sequences::Column::Value).add(1),
        )
        .filter(sequences::Column::Name.eq(sequences::CERTIFICATE_CODE))
        .exec(&txn)
        .await?;
    if bumped.rows_affected == 0 {
        sequences::ActiveModel {
            name: Set(sequences::CERTIFICATE_CODE.to_string()),
            value: Set(1),
        }
        .insert(&txn)
        .await?;
    }

    let row = sequences::Entity::find_by_id(sequences::CERTIFICATE_CODE.to_string())
        .one(&txn)
        .await?
        .ok_or_else(|| ServiceError::Internal("certificate code sequence missing".into()))?;
    txn.commit().await?;
    Ok(row.value)
}

async fn upload_image(state: &AppState, image: &FsPath) -> ServiceResult<(String, String)> {
    let drawn = tokio::fs::metadata(image)
        .await
        .map(|m| m.len() > 0)
        .unwrap_or(false);
    if !drawn {
        return Err(ServiceError::ExternalService("Cannot draw certificate image".into()));
    }

    let ipfs_link = state.content_store.upload(image).await;
    if ipfs_link.is_empty() {
        return Err(ServiceError::ExternalService("Cannot pin certificate image".into()));
    }
    let image_link = state.image_cdn.upload(image, CERTIFICATE_FOLDER).await;
    if image_link.is_empty() {
        return Err(ServiceError::ExternalService("Cannot upload certificate image".into()));
    }
    Ok((ipfs_link, image_link))
}

async fn publish_attachment(
    state: &AppState,
    path: &FsPath,
    bytes: &[u8],
    name: Option<String>,
) -> ServiceResult<AttachmentDescriptor> {
    let cid = state.content_store.upload(path).await;
    if cid.is_empty() {
        return Err(ServiceError::ExternalService("Cannot upload attachment".into()));
    }
    Ok(AttachmentDescriptor {
        hash: fingerprint(bytes, &cid),
        ipfs_link: cid,
        name: name.or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned())),
    })
}

/// Writes `bytes` to the temp dir, publishes them, and removes the file
/// whatever the outcome.
async fn stage_attachment(
    state: &AppState,
    file_name: &str,
    bytes: &[u8],
    name: Option<String>,
) -> ServiceResult<AttachmentDescriptor> {
    let temp_dir = &state.config.temp_dir;
    tokio::fs::create_dir_all(temp_dir)
        .await
        .map_err(|e| ServiceError::Internal(format!("create temp dir: {e}")))?;
    let path = temp_dir.join(format!(
        "Attachment_{}_{}",
        Uuid::new_v4().simple(),
        safe_file_name(file_name)
    ));
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| ServiceError::Internal(format!("write attachment: {e}")))?;

    let display_name = name
        .as_deref()
        .and_then(non_blank)
        .or_else(|| non_blank(file_name));
    let published = publish_attachment(state, &path, bytes, display_name).await;
    remove_temp(&path).await;
    published
}

fn image_link_of(row: &certificates::ActiveModel) -> Option<String> {
    match &row.image_link {
        Set(link) => Some(link.clone()),
        _ => None,
    }
}

/// Renders, publishes and builds the row for one prepared request. A failure
/// after the image reached the CDN removes that image again.
async fn publish(
    state: &AppState,
    issuer: &users::Model,
    prepared: Prepared,
    code: i64,
) -> ServiceResult<certificates::ActiveModel> {
    let Prepared {
        input,
        receiver,
        roster,
        attachment,
    } = prepared;

    let metadata = CertificateMetadata {
        certificate_name: input.certificate_name.trim().to_string(),
        date_of_birth: input.date_of_birth,
        graduation_year: input.graduation_year,
        classification: input.classification.trim().to_string(),
        study_mode: input.study_mode,
    };
    let image = state
        .renderer
        .render(&issuer.name, input.receiver_name.trim(), &metadata, code)
        .await
        .map_err(|err| {
            tracing::warn!(code, %err, "certificate render failed");
            ServiceError::ExternalService("Cannot draw certificate image".into())
        })?;

    let links = upload_image(state, &image).await;
    remove_temp(&image).await;
    let (ipfs_link, image_link) = links?;

    let attachment_json = match attachment {
        Some(file) => match stage_attachment(state, &file.file_name, &file.bytes, None).await {
            Ok(descriptor) => Some(descriptor.to_json()),
            Err(err) => {
                discard_images(state, std::slice::from_ref(&image_link)).await;
                return Err(err);
            }
        },
        None => None,
    };

    Ok(certificates::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code),
        issuer_id: Set(issuer.id),
        receiver_id: Set(receiver.id),
        issuer_name: Set(issuer.name.clone()),
        receiver_name: Set(receiver.name.clone()),
        name: Set(metadata.certificate_name),
        ipfs_link: Set(ipfs_link),
        image_link: Set(image_link),
        status: Set(CertificateStatus::Draft.as_i16()),
        receiver_address_wallet: Set(non_blank(&input.address_wallet)),
        receiver_identity_number: Set(non_blank(&input.identity_number)),
        receiver_dob: Set(input.date_of_birth),
        graduation_year: Set(input.graduation_year),
        classification: Set(non_blank(&metadata.classification)),
        study_mode: Set(input.study_mode.as_i16()),
        signing_type: Set(input.signing_type.as_i16()),
        sign_hash: Set(None),
        mul_sign_json: Set(roster.map(|r| r.to_json())),
        attachment_json: Set(attachment_json),
        created_date: Set(Utc::now().into()),
        modified_date: Set(None),
        signed_date: Set(None),
        sent_date: Set(None),
        received_date: Set(None),
        is_banned: Set(false),
        is_deleted: Set(false),
        note: Set(None),
    })
}

async fn insert_all(
    db: &DatabaseConnection,
    rows: Vec<certificates::ActiveModel>,
) -> ServiceResult<Vec<certificates::Model>> {
    let txn = db.begin().await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(row.insert(&txn).await?);
    }
    txn.commit().await?;
    Ok(out)
}

pub async fn create(
    state: &AppState,
    issuer: &users::Model,
    input: CreateCertificateRequest,
) -> ServiceResult<certificates::Model> {
    let db = state.db.as_ref();
    let prepared = prepare(db, input).await?;
    let code = reserve_code(db).await?;
    let row = publish(state, issuer, prepared, code).await?;
    let image_links: Vec<String> = image_link_of(&row).into_iter().collect();

    let created = match insert_all(db, vec![row]).await {
        Ok(mut created) => created
            .pop()
            .ok_or_else(|| ServiceError::Internal("certificate insert returned nothing".into()))?,
        Err(err) => {
            discard_images(state, &image_links).await;
            return Err(err);
        }
    };
    tracing::info!(certificate_id = %created.id, code, issuer_id = %issuer.id, "certificate created");
    Ok(created)
}

fn at_row(err: ServiceError, row: usize) -> ServiceError {
    match err {
        ServiceError::Validation(m) => ServiceError::Validation(format!("Row {row}: {m}")),
        ServiceError::NotFound(m) => ServiceError::NotFound(format!("Row {row}: {m}")),
        other => other,
    }
}

/// Every row is validated and resolved before anything is uploaded; all rows
/// are inserted in one commit.
pub async fn create_from_spreadsheet(
    state: &AppState,
    issuer: &users::Model,
    workbook: &[u8],
) -> ServiceResult<Vec<certificates::Model>> {
    let db = state.db.as_ref();
    let rows = import::read_workbook(workbook)?;
    if rows.is_empty() {
        return Err(ServiceError::Validation(
            "The spreadsheet has no certificate rows".into(),
        ));
    }

    let mut prepared = Vec::with_capacity(rows.len());
    for ImportedRow {
        row,
        mut request,
        attachment_path,
    } in rows
    {
        if let Some(raw) = attachment_path {
            let file = import::read_attachment(state.config.import_dir.as_deref(), &raw)
                .await
                .map_err(|e| at_row(e, row))?;
            request.attachment = Some(file);
        }
        prepared.push(prepare(db, request).await.map_err(|e| at_row(e, row))?);
    }

    let mut published = Vec::with_capacity(prepared.len());
    let mut image_links = Vec::new();
    for p in prepared {
        let code = reserve_code(db).await?;
        match publish(state, issuer, p, code).await {
            Ok(row) => {
                image_links.extend(image_link_of(&row));
                published.push(row);
            }
            Err(err) => {
                discard_images(state, &image_links).await;
                return Err(err);
            }
        }
    }

    let created = match insert_all(db, published).await {
        Ok(created) => created,
        Err(err) => {
            discard_images(state, &image_links).await;
            return Err(err);
        }
    };
    tracing::info!(issuer_id = %issuer.id, count = created.len(), "certificates imported");
    Ok(created)
}

async fn discard_images(state: &AppState, links: &[String]) {
    for link in links {
        if !state.image_cdn.delete(link).await {
            tracing::warn!(%link, "orphaned certificate image not deleted");
        }
    }
}

// ---- signing ----

async fn ensure_pair_contact<C: ConnectionTrait>(
    conn: &C,
    issuer: &users::Model,
    receiver_id: Uuid,
    now: DateTimeWithTimeZone,
) -> ServiceResult<()> {
    if issuer.id == receiver_id {
        return Ok(());
    }
    let existing = contacts::Entity::find()
        .filter(contacts::Column::IssuerId.eq(issuer.id))
        .filter(contacts::Column::ReceiverId.eq(receiver_id))
        .count(conn)
        .await?;
    if existing > 0 {
        return Ok(());
    }

    let receiver = users::Entity::find_by_id(receiver_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Receiver not found".into()))?;
    contacts::ActiveModel {
        id: Set(Uuid::new_v4()),
        issuer_id: Set(issuer.id),
        receiver_id: Set(receiver_id),
        issuer_name: Set(issuer.name.clone()),
        receiver_name: Set(receiver.name),
        status: Set(ContactStatus::Pending.as_i16()),
        created_date: Set(now),
        modified_date: Set(None),
    }
    .insert(conn)
    .await?;
    Ok(())
}

async fn apply_signature<C: ConnectionTrait>(
    conn: &C,
    actor: &users::Model,
    cert: certificates::Model,
    req: &SignCertificateRequest,
    now: DateTime<Utc>,
) -> ServiceResult<certificates::Model> {
    let signer = req.issuer_address.trim();
    if signer.is_empty() {
        return Err(ServiceError::Validation("issuerAddress is required".into()));
    }
    if !actor.is_admin() && signer != actor.receive_address {
        return Err(ServiceError::Forbidden(
            "Cannot sign with another user's address".into(),
        ));
    }

    let issuer = users::Entity::find_by_id(cert.issuer_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Issuer not found".into()))?;
    let signed_by_issuer = signer == issuer.receive_address;
    let stamp: DateTimeWithTimeZone = now.into();

    let mut active: certificates::ActiveModel = cert.clone().into();
    match cert.signing_type() {
        SigningType::SingleSigning => {
            active.status = Set(CertificateStatus::Signed.as_i16());
            active.signed_date = Set(Some(stamp));
        }
        SigningType::MultipleSigning => {
            let mut roster = cert.roster().map_err(|e| {
                ServiceError::Internal(format!("unreadable signer roster on {}: {e}", cert.id))
            })?;
            if !roster.contains(signer) && !signed_by_issuer {
                return Err(ServiceError::InvalidState("Signer not exist".into()));
            }
            roster.mark_signed(signer, now);
            let status = roster.aggregate_status();
            active.status = Set(status.as_i16());
            if status == CertificateStatus::Signed {
                active.signed_date = Set(Some(stamp));
            }
            active.mul_sign_json = Set(Some(roster.to_json()));
        }
    }
    active.modified_date = Set(Some(stamp));
    if let Some(hash) = req.sign_hash.as_deref().and_then(non_blank) {
        active.sign_hash = Set(Some(hash));
    }

    let updated = active.update(conn).await?;
    if signed_by_issuer {
        ensure_pair_contact(conn, &issuer, updated.receiver_id, stamp).await?;
    }
    tracing::info!(certificate_id = %updated.id, signer, status = ?updated.status(), "certificate signed");
    Ok(updated)
}

pub async fn sign(
    db: &DatabaseConnection,
    actor: &users::Model,
    req: SignCertificateRequest,
) -> ServiceResult<certificates::Model> {
    let txn = db.begin().await?;
    let cert = certificates::Entity::find_by_id(req.certificate_id)
        .one(&txn)
        .await?
        .ok_or_else(not_found)?;
    let updated = apply_signature(&txn, actor, cert, &req, Utc::now()).await?;
    txn.commit().await?;
    Ok(updated)
}

/// Resolves every id in one query. Duplicates collapse; any id that does not
/// resolve fails the whole call.
async fn load_many<C: ConnectionTrait>(conn: &C, ids: &[Uuid]) -> ServiceResult<Vec<certificates::Model>> {
    let mut unique = ids.to_vec();
    unique.sort();
    unique.dedup();
    if unique.is_empty() {
        return Err(ServiceError::Validation("No certificate selected".into()));
    }

    let rows = certificates::Entity::find()
        .filter(certificates::Column::Id.is_in(unique.clone()))
        .all(conn)
        .await?;
    if rows.len() != unique.len() {
        return Err(not_found());
    }
    Ok(rows)
}

pub async fn sign_many(
    db: &DatabaseConnection,
    actor: &users::Model,
    reqs: Vec<SignCertificateRequest>,
) -> ServiceResult<usize> {
    let txn = db.begin().await?;
    let ids: Vec<Uuid> = reqs.iter().map(|r| r.certificate_id).collect();
    let mut rows: HashMap<Uuid, certificates::Model> = load_many(&txn, &ids)
        .await?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();

    let now = Utc::now();
    for req in &reqs {
        let cert = rows.remove(&req.certificate_id).ok_or_else(not_found)?;
        let updated = apply_signature(&txn, actor, cert, req, now).await?;
        rows.insert(updated.id, updated);
    }
    txn.commit().await?;
    Ok(reqs.len())
}

// ---- send / ban / delete ----

/// Loads all targets, applies `change` to each and commits once.
async fn update_each<F>(
    db: &DatabaseConnection,
    actor: &users::Model,
    ids: &[Uuid],
    mut change: F,
) -> ServiceResult<usize>
where
    F: FnMut(&mut certificates::ActiveModel),
{
    let txn = db.begin().await?;
    let rows = load_many(&txn, ids).await?;
    let count = rows.len();
    for cert in rows {
        ensure_issuer(actor, &cert)?;
        let mut active: certificates::ActiveModel = cert.into();
        change(&mut active);
        active.update(&txn).await?;
    }
    txn.commit().await?;
    Ok(count)
}

pub async fn send_many(db: &DatabaseConnection, actor: &users::Model, ids: &[Uuid]) -> ServiceResult<usize> {
    let now: DateTimeWithTimeZone = Utc::now().into();
    let count = update_each(db, actor, ids, |c| {
        c.status = Set(CertificateStatus::Sent.as_i16());
        c.sent_date = Set(Some(now));
        c.received_date = Set(Some(now));
        c.modified_date = Set(Some(now));
    })
    .await?;
    tracing::info!(count, "certificates sent");
    Ok(count)
}

pub async fn send(db: &DatabaseConnection, actor: &users::Model, id: Uuid) -> ServiceResult<()> {
    send_many(db, actor, &[id]).await.map(|_| ())
}

pub async fn ban_many(
    db: &DatabaseConnection,
    actor: &users::Model,
    ids: &[Uuid],
    note: Option<String>,
) -> ServiceResult<usize> {
    let now: DateTimeWithTimeZone = Utc::now().into();
    let note = note.as_deref().and_then(non_blank);
    let count = update_each(db, actor, ids, |c| {
        c.status = Set(CertificateStatus::Banned.as_i16());
        c.is_banned = Set(true);
        c.modified_date = Set(Some(now));
        if let Some(note) = &note {
            c.note = Set(Some(note.clone()));
        }
    })
    .await?;
    tracing::info!(count, "certificates banned");
    Ok(count)
}

pub async fn ban(
    db: &DatabaseConnection,
    actor: &users::Model,
    id: Uuid,
    note: Option<String>,
) -> ServiceResult<()> {
    ban_many(db, actor, &[id], note).await.map(|_| ())
}

/// Hard delete. Nothing is removed if any target has been sent.
pub async fn delete_many(state: &AppState, actor: &users::Model, ids: &[Uuid]) -> ServiceResult<usize> {
    let txn = state.db.begin().await?;
    let rows = load_many(&txn, ids).await?;
    for cert in &rows {
        ensure_issuer(actor, cert)?;
        if matches!(cert.status(), Some(s) if !s.is_deletable()) {
            return Err(ServiceError::InvalidState(
                "The certificate that has been sent cannot be deleted".into(),
            ));
        }
    }

    let targets: Vec<Uuid> = rows.iter().map(|c| c.id).collect();
    let deleted = certificates::Entity::delete_many()
        .filter(certificates::Column::Id.is_in(targets))
        .exec(&txn)
        .await?;
    txn.commit().await?;

    let links: Vec<String> = rows
        .into_iter()
        .map(|c| c.image_link)
        .filter(|l| !l.is_empty())
        .collect();
    discard_images(state, &links).await;

    tracing::info!(count = deleted.rows_affected, "certificates deleted");
    Ok(deleted.rows_affected as usize)
}

pub async fn delete(state: &AppState, actor: &users::Model, id: Uuid) -> ServiceResult<()> {
    delete_many(state, actor, &[id]).await.map(|_| ())
}

// ---- attachments ----

fn safe_file_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Publishes `bytes` and replaces the certificate's attachment descriptor.
pub async fn upload_attachment(
    state: &AppState,
    actor: &users::Model,
    id: Uuid,
    name: Option<String>,
    file_name: &str,
    bytes: &[u8],
) -> ServiceResult<AttachmentDescriptor> {
    if bytes.is_empty() {
        return Err(ServiceError::Validation("Attachment file is empty".into()));
    }
    let db = state.db.as_ref();
    let cert = certificates::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(not_found)?;
    ensure_issuer(actor, &cert)?;

    let descriptor = stage_attachment(state, file_name, bytes, name).await?;

    let txn = db.begin().await?;
    let cert = certificates::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(not_found)?;
    let mut active: certificates::ActiveModel = cert.into();
    active.attachment_json = Set(Some(descriptor.to_json()));
    active.modified_date = Set(Some(Utc::now().into()));
    active.update(&txn).await?;
    txn.commit().await?;

    tracing::info!(certificate_id = %id, cid = %descriptor.ipfs_link, "attachment uploaded");
    Ok(descriptor)
}

/// `true` unless a banned certificate exists for the identity number.
pub async fn check_legal(db: &DatabaseConnection, identity_number: &str) -> ServiceResult<bool> {
    let identity = identity_number.trim();
    if identity.is_empty() {
        return Err(ServiceError::Validation("identityNumber is required".into()));
    }
    let banned = certificates::Entity::find()
        .filter(certificates::Column::ReceiverIdentityNumber.eq(identity))
        .filter(
            Condition::any()
                .add(certificates::Column::Status.eq(CertificateStatus::Banned.as_i16()))
                .add(certificates::Column::IsBanned.eq(true)),
        )
        .count(db)
        .await?;
    Ok(banned == 0)
}

// ---- handlers ----

#[derive(Default)]
struct UploadForm {
    id: Option<Uuid>,
    data: Option<String>,
    name: Option<String>,
    file_name: Option<String>,
    file: Option<Vec<u8>>,
}

async fn read_form(mut multipart: Multipart) -> ServiceResult<UploadForm> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        ServiceError::Validation(format!("Malformed multipart body: {e}"))
    };

    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                form.file_name = field.file_name().map(str::to_string);
                form.file = Some(field.bytes().await.map_err(malformed)?.to_vec());
            }
            "id" | "certificateId" => {
                let raw = field.text().await.map_err(malformed)?;
                let id = raw
                    .trim()
                    .parse::<Uuid>()
                    .map_err(|_| ServiceError::Validation(format!("Invalid certificate id '{raw}'")))?;
                form.id = Some(id);
            }
            "name" => form.name = Some(field.text().await.map_err(malformed)?),
            "data" => form.data = Some(field.text().await.map_err(malformed)?),
            _ => {}
        }
    }
    Ok(form)
}

/// A JSON body, or a multipart form with the request as a `data` JSON field
/// and the attachment as `file`.
async fn read_create_request(
    state: &AppState,
    req: Request,
) -> ServiceResult<CreateCertificateRequest> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));
    if !is_multipart {
        let ApiJson(input) = ApiJson::<CreateCertificateRequest>::from_request(req, state)
            .await
            .map_err(|rejected| rejected.error)?;
        return Ok(input);
    }

    let multipart = Multipart::from_request(req, state)
        .await
        .map_err(|e| ServiceError::Validation(e.body_text()))?;
    let UploadForm {
        data,
        file_name,
        file,
        ..
    } = read_form(multipart).await?;
    let data = data.ok_or_else(|| ServiceError::Validation("data is required".into()))?;
    let mut input: CreateCertificateRequest = serde_json::from_str(&data)
        .map_err(|e| ServiceError::Validation(format!("Invalid data field: {e}")))?;
    input.attachment = file.map(|bytes| AttachmentFile {
        file_name: file_name.unwrap_or_else(|| "attachment".to_string()),
        bytes,
    });
    Ok(input)
}

pub async fn create_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    req: Request,
) -> ApiResult<Uuid> {
    let input = read_create_request(&state, req).await.map_err(|e| meta.fail(e))?;
    let created = create(&state, &user, input).await.map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(created.id))
}

pub async fn create_from_excel_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    multipart: Multipart,
) -> ApiResult<Vec<Uuid>> {
    let form = read_form(multipart).await.map_err(|e| meta.fail(e))?;
    let workbook = form
        .file
        .ok_or_else(|| meta.fail(ServiceError::Validation("file is required".into())))?;
    let created = create_from_spreadsheet(&state, &user, &workbook)
        .await
        .map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(created.into_iter().map(|c| c.id).collect()))
}

pub async fn sign_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(input): ApiJson<SignCertificateRequest>,
) -> ApiResult<bool> {
    sign(&state.db, &user, input).await.map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(true))
}

pub async fn sign_many_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(input): ApiJson<Vec<SignCertificateRequest>>,
) -> ApiResult<bool> {
    sign_many(&state.db, &user, input).await.map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(true))
}

pub async fn send_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(input): ApiJson<CertificateIdRequest>,
) -> ApiResult<bool> {
    send(&state.db, &user, input.id).await.map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(true))
}

pub async fn send_many_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(ids): ApiJson<Vec<Uuid>>,
) -> ApiResult<bool> {
    send_many(&state.db, &user, &ids).await.map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(true))
}

pub async fn ban_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(input): ApiJson<BanCertificateRequest>,
) -> ApiResult<bool> {
    ban(&state.db, &user, input.id, input.note)
        .await
        .map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(true))
}

pub async fn ban_many_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(ids): ApiJson<Vec<Uuid>>,
) -> ApiResult<bool> {
    ban_many(&state.db, &user, &ids, None)
        .await
        .map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(true))
}

pub async fn upload_attachment_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    multipart: Multipart,
) -> ApiResult<AttachmentDescriptor> {
    let form = read_form(multipart).await.map_err(|e| meta.fail(e))?;
    let id = form
        .id
        .ok_or_else(|| meta.fail(ServiceError::Validation("id is required".into())))?;
    let bytes = form
        .file
        .ok_or_else(|| meta.fail(ServiceError::Validation("file is required".into())))?;
    let file_name = form.file_name.unwrap_or_default();

    let descriptor = upload_attachment(&state, &user, id, form.name, &file_name, &bytes)
        .await
        .map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(descriptor))
}

pub async fn delete_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<bool> {
    delete(&state, &user, id).await.map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(true))
}

pub async fn delete_many_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(ids): ApiJson<Vec<Uuid>>,
) -> ApiResult<bool> {
    delete_many(&state, &user, &ids).await.map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(true))
}

pub async fn check_legal_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(identity_number): Path<String>,
) -> ApiResult<bool> {
    let legal = check_legal(&state.db, &identity_number)
        .await
        .map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(legal))
}
