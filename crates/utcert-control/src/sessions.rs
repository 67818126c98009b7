//! Refresh-token lifecycle: login, rotation with reuse detection, revocation.
//!
//! Rotation links tokens through `replaced_by_token`. Presenting a token that
//! was already revoked revokes every still-active descendant in its chain, so a
//! stolen token cannot be replayed alongside the legitimate session.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait, prelude::Uuid,
};

use utcert_db::entities::{refresh_tokens, users};

use crate::auth::TokenAuthority;
use crate::error::{ServiceError, ServiceResult};

pub const REASON_REPLACED: &str = "Replaced by new token";
pub const REASON_REVOKED: &str = "Revoked without replacement";
pub const REASON_REUSE: &str = "Attempted reuse of revoked ancestor token";

// Upper bound on descendants inspected per reuse check.
const MAX_CHAIN_WALK: usize = 1024;

#[derive(Debug, Clone)]
pub struct Session {
    pub user: users::Model,
    pub access_token: String,
    pub refresh_token: String,
}

fn invalid_token() -> ServiceError {
    ServiceError::Auth("Invalid token".into())
}

fn access_token(tokens: &TokenAuthority, user_id: Uuid) -> ServiceResult<String> {
    tokens
        .generate_access_token(user_id)
        .map_err(|e| ServiceError::Internal(format!("jwt error: {e}")))
}

async fn purge_inactive(
    txn: &DatabaseTransaction,
    user_id: Uuid,
    ttl_days: i64,
    now: DateTime<Utc>,
) -> ServiceResult<u64> {
    let stale: Vec<Uuid> = refresh_tokens::Entity::find()
        .filter(refresh_tokens::Column::UserId.eq(user_id))
        .all(txn)
        .await?
        .into_iter()
        .filter(|t| t.is_purgeable(now, ttl_days))
        .map(|t| t.id)
        .collect();
    if stale.is_empty() {
        return Ok(0);
    }

    let res = refresh_tokens::Entity::delete_many()
        .filter(refresh_tokens::Column::Id.is_in(stale))
        .exec(txn)
        .await?;
    Ok(res.rows_affected)
}

async fn revoke_one(
    txn: &DatabaseTransaction,
    token: refresh_tokens::Model,
    ip: &str,
    reason: &str,
    replaced_by: Option<String>,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    let mut active: refresh_tokens::ActiveModel = token.into();
    active.revoked = Set(Some(now.into()));
    active.revoked_by_ip = Set(Some(ip.to_string()));
    active.reason_revoked = Set(Some(reason.to_string()));
    if let Some(next) = replaced_by {
        active.replaced_by_token = Set(Some(next));
    }
    active.update(txn).await?;
    Ok(())
}

/// Walks `replaced_by_token` forward from `ancestor`, revoking each active
/// descendant. Returns how many tokens were revoked.
async fn revoke_descendants(
    txn: &DatabaseTransaction,
    ancestor: &refresh_tokens::Model,
    ip: &str,
    now: DateTime<Utc>,
) -> ServiceResult<usize> {
    let mut visited: HashSet<String> = HashSet::from([ancestor.token.clone()]);
    let mut next = ancestor.replaced_by_token.clone();
    let mut revoked = 0;

    while let Some(value) = next.take() {
        if visited.len() > MAX_CHAIN_WALK || !visited.insert(value.clone()) {
            tracing::warn!(token_chain_len = visited.len(), "refresh token chain walk stopped");
            break;
        }

        let Some(child) = refresh_tokens::Entity::find()
            .filter(refresh_tokens::Column::Token.eq(value))
            .one(txn)
            .await?
        else {
            break;
        };

        next = child.replaced_by_token.clone();
        if child.is_active(now) {
            revoke_one(txn, child, ip, REASON_REUSE, None, now).await?;
            revoked += 1;
        }
    }
    Ok(revoked)
}

pub async fn authenticate(
    db: &DatabaseConnection,
    tokens: &TokenAuthority,
    ttl_days: i64,
    stake_id: &str,
    ip: &str,
) -> ServiceResult<Session> {
    let txn = db.begin().await?;
    let now = Utc::now();

    let user = users::Entity::find()
        .filter(users::Column::StakeId.eq(stake_id))
        .filter(users::Column::IsDeleted.eq(false))
        .one(&txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;

    let access_token = access_token(tokens, user.id)?;
    let refresh = tokens.generate_refresh_token(ip);
    let refresh_token = refresh.token.clone();

    purge_inactive(&txn, user.id, ttl_days, now).await?;
    refresh.into_active_model(user.id).insert(&txn).await?;
    txn.commit().await?;

    Ok(Session {
        user,
        access_token,
        refresh_token,
    })
}

pub async fn rotate(
    db: &DatabaseConnection,
    tokens: &TokenAuthority,
    ttl_days: i64,
    token: &str,
    ip: &str,
) -> ServiceResult<Session> {
    let txn = db.begin().await?;
    let now = Utc::now();

    let current = refresh_tokens::Entity::find()
        .filter(refresh_tokens::Column::Token.eq(token))
        .one(&txn)
        .await?
        .ok_or_else(invalid_token)?;

    if current.is_revoked() {
        let revoked = revoke_descendants(&txn, &current, ip, now).await?;
        txn.commit().await?;
        tracing::warn!(
            user_id = %current.user_id,
            ip,
            revoked,
            "revoked refresh token presented; descendants revoked"
        );
        return Err(invalid_token());
    }

    if !current.is_active(now) {
        return Err(invalid_token());
    }

    let user = users::Entity::find_by_id(current.user_id)
        .one(&txn)
        .await?
        .filter(|u| !u.is_deleted)
        .ok_or_else(invalid_token)?;

    let next = tokens.generate_refresh_token(ip);
    let refresh_token = next.token.clone();

    revoke_one(&txn, current, ip, REASON_REPLACED, Some(refresh_token.clone()), now).await?;
    next.into_active_model(user.id).insert(&txn).await?;
    purge_inactive(&txn, user.id, ttl_days, now).await?;

    let access_token = access_token(tokens, user.id)?;
    txn.commit().await?;

    Ok(Session {
        user,
        access_token,
        refresh_token,
    })
}

/// Revokes an active token without issuing a successor. When `owner` is set
/// the token must belong to that user.
pub async fn revoke(
    db: &DatabaseConnection,
    token: &str,
    ip: &str,
    owner: Option<Uuid>,
) -> ServiceResult<()> {
    let txn = db.begin().await?;
    let now = Utc::now();

    let current = refresh_tokens::Entity::find()
        .filter(refresh_tokens::Column::Token.eq(token))
        .one(&txn)
        .await?
        .filter(|t| t.is_active(now))
        .ok_or_else(invalid_token)?;

    if owner.is_some_and(|id| id != current.user_id) {
        return Err(invalid_token());
    }

    revoke_one(&txn, current, ip, REASON_REVOKED, None, now).await?;
    txn.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::testing::{seed_user, test_db};

    const TTL_DAYS: i64 = 2;

    fn authority() -> TokenAuthority {
        TokenAuthority::new(b"sessions-test")
    }

    async fn find_token(db: &DatabaseConnection, value: &str) -> refresh_tokens::Model {
        refresh_tokens::Entity::find()
            .filter(refresh_tokens::Column::Token.eq(value))
            .one(db)
            .await
            .unwrap()
            .expect("token row")
    }

    #[tokio::test]
    async fn authenticate_issues_both_tokens() {
        let db = test_db().await;
        let user = seed_user(&db, "stake1", "Alice", "addr1").await;
        let tokens = authority();

        let session = authenticate(&db, &tokens, TTL_DAYS, "stake1", "1.2.3.4")
            .await
            .unwrap();
        assert_eq!(session.user.id, user.id);
        assert_eq!(tokens.validate_access_token(&session.access_token), Some(user.id));

        let stored = find_token(&db, &session.refresh_token).await;
        assert!(stored.is_active(Utc::now()));
        assert_eq!(stored.created_by_ip, "1.2.3.4");
        assert_eq!(stored.user_id, user.id);
    }

    #[tokio::test]
    async fn authenticate_unknown_stake_id_is_not_found() {
        let db = test_db().await;
        let err = authenticate(&db, &authority(), TTL_DAYS, "missing", "ip")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn rotation_links_old_token_to_its_successor() {
        let db = test_db().await;
        seed_user(&db, "stake1", "Alice", "addr1").await;
        let tokens = authority();

        let t0 = authenticate(&db, &tokens, TTL_DAYS, "stake1", "ip").await.unwrap();
        let t1 = rotate(&db, &tokens, TTL_DAYS, &t0.refresh_token, "ip2").await.unwrap();
        assert_ne!(t0.refresh_token, t1.refresh_token);

        let old = find_token(&db, &t0.refresh_token).await;
        assert!(old.revoked.is_some());
        assert_eq!(old.replaced_by_token.as_deref(), Some(t1.refresh_token.as_str()));
        assert_eq!(old.reason_revoked.as_deref(), Some(REASON_REPLACED));
        assert_eq!(old.revoked_by_ip.as_deref(), Some("ip2"));

        let new = find_token(&db, &t1.refresh_token).await;
        assert!(new.is_active(Utc::now()));
    }

    #[tokio::test]
    async fn replaying_a_revoked_token_revokes_the_chain() {
        let db = test_db().await;
        seed_user(&db, "stake1", "Alice", "addr1").await;
        let tokens = authority();

        let t0 = authenticate(&db, &tokens, TTL_DAYS, "stake1", "ip").await.unwrap();
        let t1 = rotate(&db, &tokens, TTL_DAYS, &t0.refresh_token, "ip").await.unwrap();
        let t2 = rotate(&db, &tokens, TTL_DAYS, &t1.refresh_token, "ip").await.unwrap();

        let err = rotate(&db, &tokens, TTL_DAYS, &t1.refresh_token, "attacker")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Auth(_)));

        let leaf = find_token(&db, &t2.refresh_token).await;
        assert!(leaf.is_revoked());
        assert_eq!(leaf.reason_revoked.as_deref(), Some(REASON_REUSE));
        assert_eq!(leaf.revoked_by_ip.as_deref(), Some("attacker"));

        // The legitimate holder is locked out too.
        let err = rotate(&db, &tokens, TTL_DAYS, &t2.refresh_token, "ip")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Auth(_)));
    }

    #[tokio::test]
    async fn unknown_and_expired_tokens_fail_rotation() {
        let db = test_db().await;
        let user = seed_user(&db, "stake1", "Alice", "addr1").await;
        let tokens = authority();

        let err = rotate(&db, &tokens, TTL_DAYS, "NOPE", "ip").await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(_)));

        let mut expired = tokens.generate_refresh_token("ip");
        expired.created = Utc::now() - Duration::days(8);
        expired.expires = Utc::now() - Duration::days(1);
        let value = expired.token.clone();
        expired.into_active_model(user.id).insert(&db).await.unwrap();

        let err = rotate(&db, &tokens, TTL_DAYS, &value, "ip").await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(_)));
        assert!(!find_token(&db, &value).await.is_revoked());
    }

    #[tokio::test]
    async fn revoke_marks_token_and_rejects_second_attempt() {
        let db = test_db().await;
        let user = seed_user(&db, "stake1", "Alice", "addr1").await;
        let tokens = authority();
        let s = authenticate(&db, &tokens, TTL_DAYS, "stake1", "ip").await.unwrap();

        revoke(&db, &s.refresh_token, "ip9", Some(user.id)).await.unwrap();
        let row = find_token(&db, &s.refresh_token).await;
        assert_eq!(row.reason_revoked.as_deref(), Some(REASON_REVOKED));
        assert!(row.replaced_by_token.is_none());

        let err = revoke(&db, &s.refresh_token, "ip9", Some(user.id)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(_)));
    }

    #[tokio::test]
    async fn revoke_refuses_tokens_of_other_users() {
        let db = test_db().await;
        seed_user(&db, "stake1", "Alice", "addr1").await;
        let mallory = seed_user(&db, "stake2", "Mallory", "addr2").await;
        let tokens = authority();
        let s = authenticate(&db, &tokens, TTL_DAYS, "stake1", "ip").await.unwrap();

        let err = revoke(&db, &s.refresh_token, "ip", Some(mallory.id)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(_)));
        assert!(!find_token(&db, &s.refresh_token).await.is_revoked());

        // No owner restriction: administrative revoke.
        revoke(&db, &s.refresh_token, "ip", None).await.unwrap();
    }

    #[tokio::test]
    async fn login_purges_old_inactive_tokens_only() {
        let db = test_db().await;
        let user = seed_user(&db, "stake1", "Alice", "addr1").await;
        let tokens = authority();

        let mut stale = tokens.generate_refresh_token("ip");
        stale.created = Utc::now() - Duration::days(10);
        stale.expires = Utc::now() - Duration::days(3);
        let stale_value = stale.token.clone();
        stale.into_active_model(user.id).insert(&db).await.unwrap();

        let first = authenticate(&db, &tokens, TTL_DAYS, "stake1", "ip").await.unwrap();
        authenticate(&db, &tokens, TTL_DAYS, "stake1", "ip").await.unwrap();

        let remaining = refresh_tokens::Entity::find()
            .filter(refresh_tokens::Column::UserId.eq(user.id))
            .all(&db)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|t| t.token != stale_value));
        assert!(remaining.iter().any(|t| t.token == first.refresh_token));
    }
}
