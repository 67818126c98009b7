use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Certificates::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Certificates::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Certificates::Code).big_integer().not_null())
                    .col(ColumnDef::new(Certificates::IssuerId).uuid().not_null())
                    .col(ColumnDef::new(Certificates::ReceiverId).uuid().not_null())
                    .col(ColumnDef::new(Certificates::IssuerName).string().not_null())
                    .col(ColumnDef::new(Certificates::ReceiverName).string().not_null())
                    .col(ColumnDef::new(Certificates::Name).string().not_null())
                    .col(ColumnDef::new(Certificates::IpfsLink).string().not_null())
                    .col(ColumnDef::new(Certificates::ImageLink).string().not_null())
                    .col(ColumnDef::new(Certificates::Status).small_integer().not_null())
                    .col(ColumnDef::new(Certificates::ReceiverAddressWallet).string().null())
                    .col(ColumnDef::new(Certificates::ReceiverIdentityNumber).string().null())
                    .col(ColumnDef::new(Certificates::ReceiverDob).date().null())
                    .col(ColumnDef::new(Certificates::GraduationYear).integer().not_null())
                    .col(ColumnDef::new(Certificates::Classification).string().null())
                    .col(ColumnDef::new(Certificates::StudyMode).small_integer().not_null())
                    .col(ColumnDef::new(Certificates::SigningType).small_integer().not_null())
                    .col(ColumnDef::new(Certificates::SignHash).string().null())
                    .col(ColumnDef::new(Certificates::MulSignJson).text().null())
                    .col(ColumnDef::new(Certificates::AttachmentJson).text().null())
                    .col(
                        ColumnDef::new(Certificates::CreatedDate)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Certificates::ModifiedDate).timestamp_with_time_zone().null())
                    .col(ColumnDef::new(Certificates::SignedDate).timestamp_with_time_zone().null())
                    .col(ColumnDef::new(Certificates::SentDate).timestamp_with_time_zone().null())
                    .col(ColumnDef::new(Certificates::ReceivedDate).timestamp_with_time_zone().null())
                    .col(
                        ColumnDef::new(Certificates::IsBanned)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Certificates::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Certificates::Note).string().null())
                    .index(
                        Index::create()
                            .name("idx_certificates_code_unique")
                            .table(Certificates::Table)
                            .col(Certificates::Code)
                            .unique(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_certificates_issuer")
                            .from(Certificates::Table, Certificates::IssuerId)
                            .to(Users::Table, Users::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_certificates_receiver")
                            .from(Certificates::Table, Certificates::ReceiverId)
                            .to(Users::Table, Users::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_certificates_issuer_id")
                    .table(Certificates::Table)
                    .col(Certificates::IssuerId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_certificates_receiver_id")
                    .table(Certificates::Table)
                    .col(Certificates::ReceiverId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_certificates_identity_number")
                    .table(Certificates::Table)
                    .col(Certificates::ReceiverIdentityNumber)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_certificates_identity_number",
            "idx_certificates_receiver_id",
            "idx_certificates_issuer_id",
        ] {
            manager
                .drop_index(Index::drop().name(name).table(Certificates::Table).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(Certificates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Certificates {
    Table,
    Id,
    Code,
    IssuerId,
    ReceiverId,
    IssuerName,
    ReceiverName,
    Name,
    IpfsLink,
    ImageLink,
    Status,
    ReceiverAddressWallet,
    ReceiverIdentityNumber,
    ReceiverDob,
    GraduationYear,
    Classification,
    StudyMode,
    SigningType,
    SignHash,
    MulSignJson,
    AttachmentJson,
    CreatedDate,
    ModifiedDate,
    SignedDate,
    SentDate,
    ReceivedDate,
    IsBanned,
    IsDeleted,
    Note,
}
