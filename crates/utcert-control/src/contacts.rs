use axum::{
    Extension,
    extract::{Path, State},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
    prelude::{DateTimeWithTimeZone, Uuid},
};
use serde::{Deserialize, Serialize};

use utcert_core::ContactStatus;
use utcert_db::entities::{contacts, users};

use crate::error::{ApiResponse, ApiResult, ServiceError, ServiceResult};
use crate::paging::{PagedInput, PagedResult, apply_sorting};
use crate::request_meta::{ApiJson, RequestMeta};
use crate::security::CurrentUser;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContactRequest {
    pub stake_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateContactStatusRequest {
    pub id: Uuid,
    pub status: ContactStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactFilter {
    #[serde(flatten)]
    pub paging: PagedInput,
    pub name: Option<String>,
    pub status: Option<ContactStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactView {
    pub id: Uuid,
    pub issuer_id: Uuid,
    pub receiver_id: Uuid,
    pub issuer_name: String,
    pub receiver_name: String,
    /// The other party's name, seen from the caller.
    pub contact_name: String,
    pub status: Option<ContactStatus>,
    pub created_date: DateTimeWithTimeZone,
    pub modified_date: Option<DateTimeWithTimeZone>,
}

impl ContactView {
    fn new(c: contacts::Model, viewer: Uuid) -> Self {
        Self {
            contact_name: c.counterpart_name(viewer).to_string(),
            status: c.status(),
            id: c.id,
            issuer_id: c.issuer_id,
            receiver_id: c.receiver_id,
            issuer_name: c.issuer_name,
            receiver_name: c.receiver_name,
            created_date: c.created_date,
            modified_date: c.modified_date,
        }
    }
}

fn not_found() -> ServiceError {
    ServiceError::NotFound("Contact not found".into())
}

fn ensure_participant(c: &contacts::Model, actor: &users::Model) -> ServiceResult<()> {
    if actor.is_admin() || c.issuer_id == actor.id || c.receiver_id == actor.id {
        return Ok(());
    }
    Err(ServiceError::Forbidden("Not a party to this contact".into()))
}

/// Requests a contact from `requester` (issuer side) to the owner of `stake_id`.
pub async fn create(
    db: &DatabaseConnection,
    stake_id: &str,
    requester: &users::Model,
) -> ServiceResult<Uuid> {
    let txn = db.begin().await?;
    let target = users::Entity::find()
        .filter(users::Column::StakeId.eq(stake_id.trim()))
        .filter(users::Column::IsDeleted.eq(false))
        .one(&txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;
    if target.id == requester.id {
        return Err(ServiceError::Validation("Cannot add yourself as a contact".into()));
    }

    let existing = contacts::Entity::find()
        .filter(contacts::Column::IssuerId.eq(requester.id))
        .filter(contacts::Column::ReceiverId.eq(target.id))
        .count(&txn)
        .await?;
    if existing > 0 {
        return Err(ServiceError::AlreadyExists("Contact has been existed!".into()));
    }

    let id = Uuid::new_v4();
    contacts::ActiveModel {
        id: Set(id),
        issuer_id: Set(requester.id),
        receiver_id: Set(target.id),
        issuer_name: Set(requester.name.clone()),
        receiver_name: Set(target.name),
        status: Set(ContactStatus::Pending.as_i16()),
        created_date: Set(Utc::now().into()),
        modified_date: Set(None),
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    tracing::info!(contact_id = %id, issuer_id = %requester.id, receiver_id = %target.id, "contact requested");
    Ok(id)
}

pub async fn update_status(
    db: &DatabaseConnection,
    actor: &users::Model,
    id: Uuid,
    status: ContactStatus,
) -> ServiceResult<()> {
    let txn = db.begin().await?;
    let contact = contacts::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(not_found)?;
    ensure_participant(&contact, actor)?;

    let mut active: contacts::ActiveModel = contact.into();
    active.status = Set(status.as_i16());
    active.modified_date = Set(Some(Utc::now().into()));
    active.update(&txn).await?;
    txn.commit().await?;
    Ok(())
}

pub async fn delete(db: &DatabaseConnection, actor: &users::Model, id: Uuid) -> ServiceResult<()> {
    let txn = db.begin().await?;
    let contact = contacts::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(not_found)?;
    ensure_participant(&contact, actor)?;

    contacts::Entity::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;
    tracing::info!(contact_id = %id, "contact deleted");
    Ok(())
}

fn sort_column(field: &str) -> Option<contacts::Column> {
    use contacts::Column;
    Some(match field {
        "id" => Column::Id,
        "issuername" => Column::IssuerName,
        "receivername" => Column::ReceiverName,
        "status" => Column::Status,
        "createddate" => Column::CreatedDate,
        "modifieddate" => Column::ModifiedDate,
        _ => return None,
    })
}

/// Contacts on either side of `user_id`.
pub async fn list(
    db: &DatabaseConnection,
    user_id: Uuid,
    filter: &ContactFilter,
) -> ServiceResult<PagedResult<ContactView>> {
    filter.paging.validate()?;

    let mut query = contacts::Entity::find().filter(
        Condition::any()
            .add(contacts::Column::IssuerId.eq(user_id))
            .add(contacts::Column::ReceiverId.eq(user_id)),
    );
    if let Some(name) = filter.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        query = query.filter(
            Condition::any()
                .add(contacts::Column::IssuerName.contains(name))
                .add(contacts::Column::ReceiverName.contains(name)),
        );
    }
    if let Some(status) = filter.status {
        query = query.filter(contacts::Column::Status.eq(status.as_i16()));
    }

    let total_count = query.clone().count(db).await?;
    let rows = apply_sorting(
        query,
        &filter.paging.sort_keys(),
        sort_column,
        &[
            (contacts::Column::CreatedDate, Order::Asc),
            (contacts::Column::Id, Order::Asc),
        ],
    )?
    .offset(filter.paging.offset())
    .limit(filter.paging.page_size)
    .all(db)
    .await?;

    Ok(PagedResult {
        total_count,
        items: rows.into_iter().map(|c| ContactView::new(c, user_id)).collect(),
    })
}

pub async fn list_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(filter): ApiJson<ContactFilter>,
) -> ApiResult<PagedResult<ContactView>> {
    let out = list(&state.db, user.id, &filter).await.map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(out))
}

pub async fn create_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(input): ApiJson<CreateContactRequest>,
) -> ApiResult<Uuid> {
    let id = create(&state.db, &input.stake_id, &user)
        .await
        .map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(id))
}

pub async fn update_status_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(input): ApiJson<UpdateContactStatusRequest>,
) -> ApiResult<bool> {
    update_status(&state.db, &user, input.id, input.status)
        .await
        .map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(true))
}

pub async fn delete_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<bool> {
    delete(&state.db, &user, id).await.map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seed_user, test_db};

    #[tokio::test]
    async fn create_rejects_duplicates_and_self() {
        let db = test_db().await;
        let org = seed_user(&db, "org", "University", "addr-org").await;
        let bob = seed_user(&db, "bob", "Bob", "addr-bob").await;

        let id = create(&db, "bob", &org).await.unwrap();
        let row = contacts::Entity::find_by_id(id).one(&db).await.unwrap().unwrap();
        assert_eq!(row.status(), Some(ContactStatus::Pending));
        assert_eq!(row.issuer_name, "University");
        assert_eq!(row.receiver_name, "Bob");

        let err = create(&db, "bob", &org).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));

        // The reverse direction is a different ordered pair.
        create(&db, "org", &bob).await.unwrap();

        let err = create(&db, "org", &org).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        let err = create(&db, "ghost", &org).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn status_update_and_delete_need_a_participant() {
        let db = test_db().await;
        let org = seed_user(&db, "org", "University", "addr-org").await;
        let bob = seed_user(&db, "bob", "Bob", "addr-bob").await;
        let eve = seed_user(&db, "eve", "Eve", "addr-eve").await;
        let id = create(&db, "bob", &org).await.unwrap();

        let err = update_status(&db, &eve, id, ContactStatus::Accepted).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        update_status(&db, &bob, id, ContactStatus::Accepted).await.unwrap();
        let row = contacts::Entity::find_by_id(id).one(&db).await.unwrap().unwrap();
        assert_eq!(row.status(), Some(ContactStatus::Accepted));
        assert!(row.modified_date.is_some());

        let err = update_status(&db, &bob, Uuid::new_v4(), ContactStatus::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        assert!(matches!(delete(&db, &eve, id).await, Err(ServiceError::Forbidden(_))));
        delete(&db, &org, id).await.unwrap();
        assert!(matches!(delete(&db, &org, id).await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_names_the_other_party() {
        let db = test_db().await;
        let org = seed_user(&db, "org", "University", "addr-org").await;
        let bob = seed_user(&db, "bob", "Bob", "addr-bob").await;
        seed_user(&db, "ann", "Ann", "addr-ann").await;
        create(&db, "bob", &org).await.unwrap();
        let ann_contact = create(&db, "ann", &org).await.unwrap();
        update_status(&db, &org, ann_contact, ContactStatus::Accepted).await.unwrap();

        let for_bob = list(&db, bob.id, &ContactFilter::default()).await.unwrap();
        assert_eq!(for_bob.total_count, 1);
        assert_eq!(for_bob.items[0].contact_name, "University");

        let for_org = list(&db, org.id, &ContactFilter::default()).await.unwrap();
        assert_eq!(for_org.total_count, 2);
        let mut names: Vec<&str> = for_org.items.iter().map(|c| c.contact_name.as_str()).collect();
        names.sort();
        assert_eq!(names, ["Ann", "Bob"]);

        let filter: ContactFilter = serde_json::from_str(r#"{"name":"ann","status":"Accepted"}"#).unwrap();
        let only_ann = list(&db, org.id, &filter).await.unwrap();
        assert_eq!(only_ann.total_count, 1);
        assert_eq!(only_ann.items[0].id, ann_contact);

        let sorted: ContactFilter = serde_json::from_str(r#"{"sorting":"receiverName"}"#).unwrap();
        let by_name = list(&db, org.id, &sorted).await.unwrap();
        assert_eq!(by_name.items[0].contact_name, "Ann");
    }
}
