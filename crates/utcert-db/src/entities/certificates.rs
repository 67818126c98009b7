use sea_orm::entity::prelude::*;
use utcert_core::{AttachmentDescriptor, CertificateStatus, Roster, SigningType, StudyMode};

/// Hard-deleted; `is_deleted` is kept for rows imported from older schemas.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "certificates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: i64,
    pub issuer_id: Uuid,
    pub receiver_id: Uuid,
    pub issuer_name: String,
    pub receiver_name: String,
    pub name: String,
    pub ipfs_link: String,
    pub image_link: String,
    pub status: i16,
    pub receiver_address_wallet: Option<String>,
    pub receiver_identity_number: Option<String>,
    pub receiver_dob: Option<Date>,
    pub graduation_year: i32,
    pub classification: Option<String>,
    pub study_mode: i16,
    pub signing_type: i16,
    pub sign_hash: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub mul_sign_json: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub attachment_json: Option<String>,
    pub created_date: DateTimeWithTimeZone,
    pub modified_date: Option<DateTimeWithTimeZone>,
    pub signed_date: Option<DateTimeWithTimeZone>,
    pub sent_date: Option<DateTimeWithTimeZone>,
    pub received_date: Option<DateTimeWithTimeZone>,
    pub is_banned: bool,
    pub is_deleted: bool,
    pub note: Option<String>,
}

impl Model {
    pub fn status(&self) -> Option<CertificateStatus> {
        CertificateStatus::from_i16(self.status)
    }

    pub fn signing_type(&self) -> SigningType {
        SigningType::from_i16(self.signing_type).unwrap_or_default()
    }

    pub fn study_mode(&self) -> Option<StudyMode> {
        StudyMode::from_i16(self.study_mode)
    }

    pub fn roster(&self) -> Result<Roster, serde_json::Error> {
        Roster::from_json(self.mul_sign_json.as_deref().unwrap_or_default())
    }

    pub fn attachment(&self) -> Result<Option<AttachmentDescriptor>, serde_json::Error> {
        AttachmentDescriptor::from_json(self.attachment_json.as_deref().unwrap_or_default())
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
