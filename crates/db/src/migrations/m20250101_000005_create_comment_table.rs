//! Create comment table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Comment::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Comment::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Comment::AuthorId).string_len(32).not_null())
                    .col(ColumnDef::new(Comment::TargetId).string_len(32).not_null())
                    .col(ColumnDef::new(Comment::TargetKind).string_len(16).not_null())
                    .col(ColumnDef::new(Comment::Content).text().not_null())
                    .col(
                        ColumnDef::new(Comment::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_comment_author")
                            .from(Comment::Table, Comment::AuthorId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: (target_id, target_kind, id) for listing comments on a target
        manager
            .create_index(
                Index::create()
                    .name("idx_comment_target")
                    .table(Comment::Table)
                    .col(Comment::TargetId)
                    .col(Comment::TargetKind)
                    .col(Comment::Id)
                    .to_owned(),
            )
            .await?;

        // Index: author_id
        manager
            .create_index(
                Index::create()
                    .name("idx_comment_author_id")
                    .table(Comment::Table)
                    .col(Comment::AuthorId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Comment::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Comment {
    Table,
    Id,
    AuthorId,
    TargetId,
    TargetKind,
    Content,
    CreatedAt,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}
