use std::collections::HashMap;

use axum::{Extension, extract::State};
use chrono::NaiveDate;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, Order, PaginatorTrait, QueryFilter,
    QuerySelect, Select,
    prelude::{DateTimeWithTimeZone, Uuid},
};
use serde::{Deserialize, Serialize};

use utcert_core::{
    AttachmentDescriptor, CertificateStatus, ContactStatus, SignerState, SigningType, StudyMode,
    format_code,
};
use utcert_db::entities::{certificates, contacts, users};

use crate::error::{ApiResponse, ApiResult, ServiceResult};
use crate::paging::{PagedInput, PagedResult, apply_sorting};
use crate::request_meta::{ApiJson, RequestMeta};
use crate::security::CurrentUser;
use crate::state::AppState;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CertificateFilter {
    #[serde(flatten)]
    pub paging: PagedInput,
    pub certificate_status: Option<CertificateStatus>,
    pub certificate_name: Option<String>,
    /// Issued lists only.
    pub received_name: Option<String>,
    /// Received lists only: matches the issuer name.
    pub organization_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateView {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub issuer_id: Uuid,
    pub issuer_name: String,
    pub receiver_id: Uuid,
    pub receiver_name: String,
    pub status: Option<CertificateStatus>,
    pub ipfs_link: String,
    pub image_link: String,
    pub receiver_address_wallet: Option<String>,
    pub receiver_identity_number: Option<String>,
    pub receiver_dob: Option<NaiveDate>,
    pub graduation_year: i32,
    pub classification: Option<String>,
    pub study_mode: Option<StudyMode>,
    pub signing_type: SigningType,
    pub sign_hash: Option<String>,
    pub signers: Vec<SignerState>,
    pub attachment: Option<AttachmentDescriptor>,
    pub created_date: DateTimeWithTimeZone,
    pub signed_date: Option<DateTimeWithTimeZone>,
    pub sent_date: Option<DateTimeWithTimeZone>,
    pub received_date: Option<DateTimeWithTimeZone>,
    pub is_banned: bool,
    pub note: Option<String>,
    pub contact_id: Option<Uuid>,
    pub contact_status: Option<ContactStatus>,
}

impl CertificateView {
    fn new(c: certificates::Model, contact: Option<&contacts::Model>) -> Self {
        let signers = match c.roster() {
            Ok(r) => r.entries().to_vec(),
            Err(err) => {
                tracing::warn!(certificate_id = %c.id, %err, "unreadable signer roster");
                Vec::new()
            }
        };
        let attachment = c.attachment().unwrap_or_else(|err| {
            tracing::warn!(certificate_id = %c.id, %err, "unreadable attachment descriptor");
            None
        });

        Self {
            id: c.id,
            code: format_code(c.code),
            status: c.status(),
            study_mode: c.study_mode(),
            signing_type: c.signing_type(),
            name: c.name,
            issuer_id: c.issuer_id,
            issuer_name: c.issuer_name,
            receiver_id: c.receiver_id,
            receiver_name: c.receiver_name,
            ipfs_link: c.ipfs_link,
            image_link: c.image_link,
            receiver_address_wallet: c.receiver_address_wallet,
            receiver_identity_number: c.receiver_identity_number,
            receiver_dob: c.receiver_dob,
            graduation_year: c.graduation_year,
            classification: c.classification,
            sign_hash: c.sign_hash,
            signers,
            attachment,
            created_date: c.created_date,
            signed_date: c.signed_date,
            sent_date: c.sent_date,
            received_date: c.received_date,
            is_banned: c.is_banned,
            note: c.note,
            contact_id: contact.map(|k| k.id),
            contact_status: contact.and_then(|k| k.status()),
        }
    }
}

fn sort_column(field: &str) -> Option<certificates::Column> {
    use certificates::Column;
    Some(match field {
        "code" => Column::Code,
        "name" | "certificatename" => Column::Name,
        "receivername" => Column::ReceiverName,
        "issuername" | "organizationname" => Column::IssuerName,
        "status" => Column::Status,
        "createddate" => Column::CreatedDate,
        "signeddate" => Column::SignedDate,
        "sentdate" => Column::SentDate,
        "receiveddate" => Column::ReceivedDate,
        "graduationyear" => Column::GraduationYear,
        _ => return None,
    })
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

async fn page(
    db: &DatabaseConnection,
    query: Select<certificates::Entity>,
    paging: &PagedInput,
) -> ServiceResult<PagedResult<CertificateView>> {
    paging.validate()?;
    let total_count = query.clone().count(db).await?;
    let rows = apply_sorting(
        query,
        &paging.sort_keys(),
        sort_column,
        &[(certificates::Column::Code, Order::Desc)],
    )?
    .offset(paging.offset())
    .limit(paging.page_size)
    .all(db)
    .await?;

    let contacts = pair_contacts(db, &rows).await?;
    let items = rows
        .into_iter()
        .map(|c| {
            let contact = contacts.get(&(c.issuer_id, c.receiver_id));
            CertificateView::new(c, contact)
        })
        .collect();
    Ok(PagedResult { total_count, items })
}

/// Contacts keyed by ordered (issuer, receiver) pair for the given rows.
async fn pair_contacts(
    db: &DatabaseConnection,
    rows: &[certificates::Model],
) -> ServiceResult<HashMap<(Uuid, Uuid), contacts::Model>> {
    if rows.is_empty() {
        return Ok(HashMap::new());
    }
    let issuers: Vec<Uuid> = rows.iter().map(|c| c.issuer_id).collect();
    let receivers: Vec<Uuid> = rows.iter().map(|c| c.receiver_id).collect();

    let found = contacts::Entity::find()
        .filter(contacts::Column::IssuerId.is_in(issuers))
        .filter(contacts::Column::ReceiverId.is_in(receivers))
        .all(db)
        .await?;
    Ok(found
        .into_iter()
        .map(|k| ((k.issuer_id, k.receiver_id), k))
        .collect())
}

/// Certificates the user issued or is a designated co-signer of.
pub async fn list_issued(
    db: &DatabaseConnection,
    user: &users::Model,
    filter: &CertificateFilter,
) -> ServiceResult<PagedResult<CertificateView>> {
    let mut scope = Condition::any().add(certificates::Column::IssuerId.eq(user.id));
    if !user.receive_address.is_empty() {
        // Quoted so one address is never matched as a prefix of another.
        scope = scope.add(
            certificates::Column::MulSignJson.contains(format!("\"{}\"", user.receive_address)),
        );
    }

    let mut query = certificates::Entity::find().filter(scope);
    if let Some(name) = non_blank(&filter.certificate_name) {
        query = query.filter(certificates::Column::Name.contains(name));
    }
    if let Some(name) = non_blank(&filter.received_name) {
        query = query.filter(certificates::Column::ReceiverName.contains(name));
    }
    if let Some(status) = filter.certificate_status {
        query = query.filter(certificates::Column::Status.eq(status.as_i16()));
    }
    page(db, query, &filter.paging).await
}

/// Sent certificates addressed to the user.
pub async fn list_received(
    db: &DatabaseConnection,
    user: &users::Model,
    filter: &CertificateFilter,
) -> ServiceResult<PagedResult<CertificateView>> {
    let mut query = certificates::Entity::find()
        .filter(certificates::Column::ReceiverId.eq(user.id))
        .filter(certificates::Column::IsDeleted.eq(false))
        .filter(certificates::Column::Status.eq(CertificateStatus::Sent.as_i16()));
    if let Some(name) = non_blank(&filter.certificate_name) {
        query = query.filter(certificates::Column::Name.contains(name));
    }
    if let Some(org) = non_blank(&filter.organization_name) {
        query = query.filter(certificates::Column::IssuerName.contains(org));
    }
    if let Some(status) = filter.certificate_status {
        query = query.filter(certificates::Column::Status.eq(status.as_i16()));
    }
    page(db, query, &filter.paging).await
}

pub async fn list_issued_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(filter): ApiJson<CertificateFilter>,
) -> ApiResult<PagedResult<CertificateView>> {
    let out = list_issued(&state.db, &user, &filter)
        .await
        .map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(out))
}

pub async fn list_received_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(filter): ApiJson<CertificateFilter>,
) -> ApiResult<PagedResult<CertificateView>> {
    let out = list_received(&state.db, &user, &filter)
        .await
        .map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(out))
}
