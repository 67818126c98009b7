use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Contacts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Contacts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Contacts::IssuerId).uuid().not_null())
                    .col(ColumnDef::new(Contacts::ReceiverId).uuid().not_null())
                    .col(ColumnDef::new(Contacts::IssuerName).string().not_null())
                    .col(ColumnDef::new(Contacts::ReceiverName).string().not_null())
                    .col(
                        ColumnDef::new(Contacts::Status)
                            .small_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Contacts::CreatedDate)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Contacts::ModifiedDate).timestamp_with_time_zone().null())
                    .index(
                        Index::create()
                            .name("idx_contacts_pair_unique")
                            .table(Contacts::Table)
                            .col(Contacts::IssuerId)
                            .col(Contacts::ReceiverId)
                            .unique(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contacts_issuer")
                            .from(Contacts::Table, Contacts::IssuerId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contacts_receiver")
                            .from(Contacts::Table, Contacts::ReceiverId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // The pair index covers issuer lookups; receivers need their own.
        manager
            .create_index(
                Index::create()
                    .name("idx_contacts_receiver_id")
                    .table(Contacts::Table)
                    .col(Contacts::ReceiverId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_contacts_receiver_id")
                    .table(Contacts::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Contacts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Contacts {
    Table,
    Id,
    IssuerId,
    ReceiverId,
    IssuerName,
    ReceiverName,
    Status,
    CreatedDate,
    ModifiedDate,
}
