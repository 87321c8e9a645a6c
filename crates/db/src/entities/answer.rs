//! Answer entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "answer")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The question this answers
    #[sea_orm(indexed)]
    pub question_id: String,

    /// The user who wrote the answer
    #[sea_orm(indexed)]
    pub author_id: String,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    #[sea_orm(default_value = false)]
    pub is_accepted: bool,

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
        belongs_to = "super::question::Entity",
        from = "Column::QuestionId",
        to = "super::question::Column::Id",
        on_delete = "Cascade"
    )]
    Question,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::AuthorId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Author,
}

impl Related<super::question::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Question.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Author.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
