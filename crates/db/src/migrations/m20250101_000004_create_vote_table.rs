//! Create vote table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Vote::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Vote::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Vote::UserId).string_len(32).not_null())
                    .col(ColumnDef::new(Vote::TargetId).string_len(32).not_null())
                    .col(ColumnDef::new(Vote::TargetKind).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Vote::Value)
                            .small_integer()
                            .not_null()
                            .check(Expr::col(Vote::Value).is_in([1, -1])),
                    )
                    .col(
                        ColumnDef::new(Vote::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Vote::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vote_user")
                            .from(Vote::Table, Vote::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: (user_id, target_id, target_kind) - one vote per user per target
        manager
            .create_index(
                Index::create()
                    .name("idx_vote_user_target")
                    .table(Vote::Table)
                    .col(Vote::UserId)
                    .col(Vote::TargetId)
                    .col(Vote::TargetKind)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: (target_id, target_kind) (for consistency scans)
        manager
            .create_index(
                Index::create()
                    .name("idx_vote_target")
                    .table(Vote::Table)
                    .col(Vote::TargetId)
                    .col(Vote::TargetKind)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Vote::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Vote {
    Table,
    Id,
    UserId,
    TargetId,
    TargetKind,
    Value,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}
