use sea_orm::entity::prelude::*;
use utcert_core::Role;

/// Soft-deleted only: `is_deleted` is set, the row stays.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub stake_id: String,
    pub name: String,
    pub receive_address: String,
    pub avatar_uri: Option<String>,
    pub role: i16,
    pub is_verified: bool,
    pub is_deleted: bool,
    pub created_date: DateTimeWithTimeZone,
    pub modified_date: Option<DateTimeWithTimeZone>,
}

impl Model {
    pub fn role(&self) -> Role {
        Role::from_i16(self.role).unwrap_or_default()
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Role::Admin
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::refresh_tokens::Entity")]
    RefreshTokens,
}

impl Related<super::refresh_tokens::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RefreshTokens.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
