use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, prelude::Uuid,
};
use serde::{Deserialize, Serialize};

use utcert_core::Role;
use utcert_db::entities::users;

use crate::error::{ApiResult, ApiResponse, ServiceError, ServiceResult};
use crate::request_meta::{ApiJson, RequestMeta};
use crate::security::CurrentUser;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub stake_id: String,
    pub name: String,
    pub receive_address: String,
    pub avatar_uri: Option<String>,
    pub role: Role,
    pub is_verified: bool,
    pub is_deleted: bool,
}

impl From<&users::Model> for UserView {
    fn from(u: &users::Model) -> Self {
        Self {
            id: u.id,
            stake_id: u.stake_id.clone(),
            name: u.name.clone(),
            receive_address: u.receive_address.clone(),
            avatar_uri: u.avatar_uri.clone(),
            role: u.role(),
            is_verified: u.is_verified,
            is_deleted: u.is_deleted,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub stake_id: String,
    pub name: String,
    pub receive_address: String,
    pub avatar_uri: Option<String>,
}

fn required<'a>(value: &'a str, field: &str) -> ServiceResult<&'a str> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ServiceError::Validation(format!("{field} is required")));
    }
    Ok(v)
}

pub async fn register(db: &DatabaseConnection, input: RegisterRequest) -> ServiceResult<Uuid> {
    let stake_id = required(&input.stake_id, "stakeId")?;
    let name = required(&input.name, "name")?;
    let receive_address = required(&input.receive_address, "receiveAddress")?;

    let txn = db.begin().await?;
    let taken = users::Entity::find()
        .filter(users::Column::StakeId.eq(stake_id))
        .count(&txn)
        .await?
        > 0;
    if taken {
        return Err(ServiceError::AlreadyExists("User has been existed!".into()));
    }

    let id = Uuid::new_v4();
    users::ActiveModel {
        id: Set(id),
        stake_id: Set(stake_id.to_string()),
        name: Set(name.to_string()),
        receive_address: Set(receive_address.to_string()),
        avatar_uri: Set(input.avatar_uri.filter(|a| !a.trim().is_empty())),
        role: Set(Role::User.as_i16()),
        is_verified: Set(false),
        is_deleted: Set(false),
        created_date: Set(Utc::now().into()),
        modified_date: Set(None),
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    tracing::info!(user_id = %id, "user registered");
    Ok(id)
}

/// Whether an active user holds `stake_id`. Never fails for an unknown id.
pub async fn exists(db: &DatabaseConnection, stake_id: &str) -> ServiceResult<bool> {
    let n = users::Entity::find()
        .filter(users::Column::StakeId.eq(stake_id.trim()))
        .filter(users::Column::IsDeleted.eq(false))
        .count(db)
        .await?;
    Ok(n > 0)
}

pub async fn list(db: &DatabaseConnection) -> ServiceResult<Vec<UserView>> {
    let rows = users::Entity::find()
        .order_by_asc(users::Column::CreatedDate)
        .all(db)
        .await?;
    Ok(rows.iter().map(UserView::from).collect())
}

pub async fn register_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    ApiJson(input): ApiJson<RegisterRequest>,
) -> ApiResult<Uuid> {
    let id = register(&state.db, input).await.map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(id))
}

pub async fn exists_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(stake_id): Path<String>,
) -> ApiResult<bool> {
    let found = exists(&state.db, &stake_id).await.map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(found))
}

pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<ApiResponse<UserView>> {
    ApiResponse::ok(UserView::from(&user))
}

pub async fn list_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Vec<UserView>> {
    if !user.is_admin() {
        return Err(meta.fail(ServiceError::Forbidden("admin only".into())));
    }
    let rows = list(&state.db).await.map_err(|e| meta.fail(e))?;
    Ok(ApiResponse::ok(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_db;

    fn request(stake_id: &str) -> RegisterRequest {
        RegisterRequest {
            stake_id: stake_id.to_string(),
            name: "Org".to_string(),
            receive_address: format!("addr-{stake_id}"),
            avatar_uri: Some("  ".to_string()),
        }
    }

    #[tokio::test]
    async fn register_creates_unverified_user() {
        let db = test_db().await;
        let id = register(&db, request("stake1")).await.unwrap();

        let row = users::Entity::find_by_id(id).one(&db).await.unwrap().unwrap();
        assert_eq!(row.role(), Role::User);
        assert!(!row.is_verified);
        assert!(!row.is_deleted);
        assert!(row.avatar_uri.is_none());
        assert!(exists(&db, "stake1").await.unwrap());
        assert!(!exists(&db, "stake2").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_stake_id_is_rejected() {
        let db = test_db().await;
        register(&db, request("stake1")).await.unwrap();
        let err = register(&db, request("stake1")).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));
        assert_eq!(list(&db).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_fields_fail_validation() {
        let db = test_db().await;
        let mut input = request("stake1");
        input.receive_address = " ".into();
        let err = register(&db, input).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(m) if m.contains("receiveAddress")));
    }
}
