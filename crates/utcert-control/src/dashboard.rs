use std::collections::HashMap;

use axum::{Extension, extract::State};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QuerySelect, prelude::Uuid, sea_query::Expr,
};
use serde::Serialize;

use utcert_core::{CertificateStatus, ContactStatus};
use utcert_db::entities::{certificates, contacts, users};

use crate::error::{ApiResponse, ApiResult, ServiceError, ServiceResult};
use crate::request_meta::RequestMeta;
use crate::security::CurrentUser;
use crate::state::AppState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub username: String,
    pub is_verified: bool,
    pub avatar_uri: Option<String>,
    /// Contacts the user requested, by status.
    pub pending: u64,
    pub accepted: u64,
    /// Certificates the user issued, by status.
    pub draft: u64,
    pub signed: u64,
    pub sent: u64,
    pub banned: u64,
    pub pending_signature: u64,
    /// Signed certificates addressed to the user.
    pub received: u64,
}

#[derive(Debug, FromQueryResult)]
struct StatusCount {
    status: i16,
    total: i64,
}

fn by_status(rows: Vec<StatusCount>) -> HashMap<i16, u64> {
    rows.into_iter()
        .map(|r| (r.status, u64::try_from(r.total).unwrap_or(0)))
        .collect()
}

pub async fn summary(db: &DatabaseConnection, user_id: Uuid) -> ServiceResult<DashboardView> {
    let user = users::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;

    let contact_counts = by_status(
        contacts::Entity::find()
            .select_only()
            .column(contacts::Column::Status)
            .column_as(Expr::col(contacts::Column::Id).count(), "total")
            .filter(contacts::Column::IssuerId.eq(user.id))
            .group_by(contacts::Column::Status)
            .into_model::<StatusCount>()
            .all(db)
            .await?,
    );
    let issued_counts = by_status(
        certificates::Entity::find()
            .select_only()
            .column(certificates::Column::Status)
            .column_as(Expr::col(certificates::Column::Id).count(), "total")
            .filter(certificates::Column::IssuerId.eq(user.id))
            .group_by(certificates::Column::Status)
            .into_model::<StatusCount>()
            .all(db)
            .await?,
    );
    let received = certificates::Entity::find()
        .filter(certificates::Column::ReceiverId.eq(user.id))
        .filter(certificates::Column::Status.eq(CertificateStatus::Signed.as_i16()))
        .count(db)
        .await?;

    let contacts_in = |s: ContactStatus| contact_counts.get(&s.as_i16()).copied().unwrap_or(0);
    let issued_in = |s: CertificateStatus| issued_counts.get(&s.as_i16()).copied().unwrap_or(0);

    Ok(DashboardView {
        username: user.name,
        is_verified: user.is_verified,
        avatar_uri: user.avatar_uri,
        pending: contacts_in(ContactStatus::Pending),
        accepted: contacts_in(ContactStatus::Accepted),
        draft: issued_in(CertificateStatus::Draft),
        signed: issued_in(CertificateStatus::Signed),
        sent: issued_in(CertificateStatus::Sent),
        banned: issued_in(CertificateStatus::Banned),
        pending_signature: issued_in(CertificateStatus::Pending),
        received,
    })
}

pub async fn summary_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<DashboardView> {
    let view = summary(&state.db, user.id).await.map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::{self as engine, CreateCertificateRequest, SignCertificateRequest};
    use crate::contacts as ledger;
    use crate::testing::{seed_user, test_app};
    use utcert_core::{SigningType, StudyMode};

    fn request(stake_id: &str) -> CreateCertificateRequest {
        CreateCertificateRequest {
            stake_id: stake_id.to_string(),
            address_wallet: String::new(),
            identity_number: String::new(),
            certificate_name: "Bachelor".into(),
            receiver_name: "Printed".into(),
            date_of_birth: None,
            graduation_year: 2024,
            classification: String::new(),
            study_mode: StudyMode::FullTime,
            signing_type: SigningType::SingleSigning,
            signer_address: None,
            attachment: None,
        }
    }

    fn sign_as(id: Uuid, address: &str) -> SignCertificateRequest {
        SignCertificateRequest {
            certificate_id: id,
            issuer_address: address.to_string(),
            sign_hash: None,
        }
    }

    #[tokio::test]
    async fn counts_contacts_and_certificates_by_status() {
        let app = test_app().await;
        let db = app.state.db.as_ref();
        let org = seed_user(db, "org", "University", "addr-org").await;
        let ann = seed_user(db, "ann", "Ann", "addr-ann").await;
        seed_user(db, "bob", "Bob", "addr-bob").await;
        seed_user(db, "cal", "Cal", "addr-cal").await;

        ledger::create(db, "bob", &org).await.unwrap();
        ledger::create(db, "ann", &org).await.unwrap();
        let cal = ledger::create(db, "cal", &org).await.unwrap();
        ledger::update_status(db, &org, cal, ContactStatus::Accepted).await.unwrap();

        let mut issued = Vec::new();
        for _ in 0..4 {
            issued.push(engine::create(&app.state, &org, request("bob")).await.unwrap());
        }
        engine::sign(db, &org, sign_as(issued[0].id, "addr-org")).await.unwrap();

        let to_org = engine::create(&app.state, &ann, request("org")).await.unwrap();
        engine::sign(db, &ann, sign_as(to_org.id, "addr-ann")).await.unwrap();

        let view = summary(db, org.id).await.unwrap();
        assert_eq!(
            view,
            DashboardView {
                username: "University".into(),
                is_verified: true,
                avatar_uri: None,
                pending: 2,
                accepted: 1,
                draft: 3,
                signed: 1,
                sent: 0,
                banned: 0,
                pending_signature: 0,
                received: 1,
            }
        );
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let app = test_app().await;
        let err = summary(app.state.db.as_ref(), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn new_user_has_zero_counts() {
        let app = test_app().await;
        let db = app.state.db.as_ref();
        let user = seed_user(db, "new", "Newcomer", "addr-new").await;
        let view = summary(db, user.id).await.unwrap();
        assert_eq!(view.username, "Newcomer");
        assert_eq!(
            (view.pending, view.accepted, view.draft, view.signed, view.received),
            (0, 0, 0, 0, 0)
        );
    }
}
