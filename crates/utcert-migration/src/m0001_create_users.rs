use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Users::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Users::StakeId).string().not_null())
                    .col(ColumnDef::new(Users::Name).string().not_null())
                    .col(ColumnDef::new(Users::ReceiveAddress).string().not_null())
                    .col(ColumnDef::new(Users::AvatarUri).string().null())
                    .col(
                        ColumnDef::new(Users::Role)
                            .small_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Users::IsVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Users::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Users::CreatedDate)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Users::ModifiedDate).timestamp_with_time_zone().null())
                    .index(
                        Index::create()
                            .name("idx_users_stake_id_unique")
                            .table(Users::Table)
                            .col(Users::StakeId)
                            .unique(),
                    )
                    .to_owned(),
            )
            .await?;

        // Signers are resolved by wallet address.
        manager
            .create_index(
                Index::create()
                    .name("idx_users_receive_address")
                    .table(Users::Table)
                    .col(Users::ReceiveAddress)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_users_receive_address")
                    .table(Users::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    StakeId,
    Name,
    ReceiveAddress,
    AvatarUri,
    Role,
    IsVerified,
    IsDeleted,
    CreatedDate,
    ModifiedDate,
}
