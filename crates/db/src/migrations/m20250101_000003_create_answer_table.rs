//! Create answer table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Answer::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Answer::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Answer::QuestionId).string_len(32).not_null())
                    .col(ColumnDef::new(Answer::AuthorId).string_len(32).not_null())
                    .col(ColumnDef::new(Answer::Content).text().not_null())
                    .col(ColumnDef::new(Answer::IsAccepted).boolean().not_null().default(false))
                    .col(ColumnDef::new(Answer::Upvotes).json_binary().not_null().default("[]"))
                    .col(ColumnDef::new(Answer::Downvotes).json_binary().not_null().default("[]"))
                    .col(ColumnDef::new(Answer::Version).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Answer::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Answer::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_answer_question")
                            .from(Answer::Table, Answer::QuestionId)
                            .to(Question::Table, Question::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_answer_author")
                            .from(Answer::Table, Answer::AuthorId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: question_id (for listing answers on a question)
        manager
            .create_index(
                Index::create()
                    .name("idx_answer_question_id")
                    .table(Answer::Table)
                    .col(Answer::QuestionId)
                    .to_owned(),
            )
            .await?;

        // Index: author_id
        manager
            .create_index(
                Index::create()
                    .name("idx_answer_author_id")
                    .table(Answer::Table)
                    .col(Answer::AuthorId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Answer::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Answer {
    Table,
    Id,
    QuestionId,
    AuthorId,
    Content,
    IsAccepted,
    Upvotes,
    Downvotes,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Question {
    Table,
    Id,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}
