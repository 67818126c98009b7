use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

const CERTIFICATE_CODE: &str = "certificate_code";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Sequences::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Sequences::Name).string().not_null().primary_key())
                    .col(
                        ColumnDef::new(Sequences::Value)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        // Codes start at 1: the first increment moves the seed from 0.
        let seed = Query::insert()
            .into_table(Sequences::Table)
            .columns([Sequences::Name, Sequences::Value])
            .values_panic([CERTIFICATE_CODE.into(), 0i64.into()])
            .to_owned();
        manager.exec_stmt(seed).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Sequences::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Sequences {
    Table,
    Name,
    Value,
}
