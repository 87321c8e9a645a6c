//! Question entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "question")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The user who asked the question
    #[sea_orm(indexed)]
    pub author_id: String,

    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub tags: Json,

    /// User IDs with a current +1 vote
    #[sea_orm(column_type = "JsonBinary")]
    pub upvotes: Json,

    /// User IDs with a current -1 vote
    #[sea_orm(column_type = "JsonBinary")]
    pub downvotes: Json,

    /// Bumped on every membership write
    #[sea_orm(default_value = 0)]
    pub version: i32,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::AuthorId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Author,

    #[sea_orm(has_many = "super::answer::Entity")]
    Answers,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Author.def()
    }
}

impl Related<super::answer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Answers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
