use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Events::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Events::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Events::Slug).string().not_null())
                    .col(ColumnDef::new(Events::Key).string().not_null().default(""))
                    .col(ColumnDef::new(Events::Request).json_binary().not_null())
                    .col(
                        ColumnDef::new(Events::RunAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Events::Recurring).json_binary())
                    .col(
                        ColumnDef::new(Events::Failed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Events::FailedCode).integer())
                    .col(ColumnDef::new(Events::FailedResponse).text())
                    .col(
                        ColumnDef::new(Events::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Events::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Identity of an event; also the ON CONFLICT target of upserts.
        manager
            .create_index(
                Index::create()
                    .table(Events::Table)
                    .col(Events::Slug)
                    .col(Events::Key)
                    .name("idx_events_slug_key")
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Horizon scans: pending events by due time.
        manager
            .create_index(
                Index::create()
                    .table(Events::Table)
                    .col(Events::Failed)
                    .col(Events::RunAt)
                    .name("idx_events_failed_run_at")
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(Events::Table)
                    .col(Events::RunAt)
                    .name("idx_events_run_at")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Events::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Events {
    Table,
    Id,
    Slug,
    Key,
    Request,
    RunAt,
    Recurring,
    Failed,
    FailedCode,
    FailedResponse,
    CreatedAt,
    UpdatedAt,
}
