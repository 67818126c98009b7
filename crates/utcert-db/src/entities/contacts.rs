use sea_orm::entity::prelude::*;
use utcert_core::ContactStatus;

/// One row per ordered (issuer, receiver) pair.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "contacts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub issuer_id: Uuid,
    pub receiver_id: Uuid,
    pub issuer_name: String,
    pub receiver_name: String,
    pub status: i16,
    pub created_date: DateTimeWithTimeZone,
    pub modified_date: Option<DateTimeWithTimeZone>,
}

impl Model {
    pub fn status(&self) -> Option<ContactStatus> {
        ContactStatus::from_i16(self.status)
    }

    /// Name of the party on the other side of `user_id`.
    pub fn counterpart_name(&self, user_id: Uuid) -> &str {
        if self.issuer_id == user_id {
            &self.receiver_name
        } else {
            &self.issuer_name
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::IssuerId",
        to = "super::users::Column::Id"
    )]
    Issuer,
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::ReceiverId",
        to = "super::users::Column::Id"
    )]
    Receiver,
}

impl ActiveModelBehavior for ActiveModel {}
