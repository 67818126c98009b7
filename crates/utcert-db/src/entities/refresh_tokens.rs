use chrono::{Duration, Utc};
use sea_orm::entity::prelude::*;

/// Hard-deleted once inactive and older than the retention window.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "refresh_tokens")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    #[sea_orm(unique)]
    pub token: String,
    pub expires: DateTimeWithTimeZone,
    pub created: DateTimeWithTimeZone,
    pub created_by_ip: String,
    pub revoked: Option<DateTimeWithTimeZone>,
    pub revoked_by_ip: Option<String>,
    pub replaced_by_token: Option<String>,
    pub reason_revoked: Option<String>,
}

impl Model {
    pub fn is_expired(&self, now: chrono::DateTime<Utc>) -> bool {
        now.fixed_offset() >= self.expires
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.is_some()
    }

    pub fn is_active(&self, now: chrono::DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }

    /// Inactive and created at least `retention_days` ago.
    pub fn is_purgeable(&self, now: chrono::DateTime<Utc>, retention_days: i64) -> bool {
        !self.is_active(now) && self.created + Duration::days(retention_days) <= now.fixed_offset()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id"
    )]
    Users,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
