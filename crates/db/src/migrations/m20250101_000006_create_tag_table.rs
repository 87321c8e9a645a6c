//! Create tag table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tag::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tag::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Tag::Name).string_len(128).not_null().unique_key())
                    .col(ColumnDef::new(Tag::QuestionsCount).integer().not_null().default(0))
                    .col(ColumnDef::new(Tag::LastUsedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Tag::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: questions_count (for listing popular tags)
        manager
            .create_index(
                Index::create()
                    .name("idx_tag_questions_count")
                    .table(Tag::Table)
                    .col(Tag::QuestionsCount)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tag::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Tag {
    Table,
    Id,
    Name,
    QuestionsCount,
    LastUsedAt,
    CreatedAt,
}
