//! Comment entity (a short remark attached to a question or answer).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::vote::TargetKind;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "comment")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The user who wrote the comment
    #[sea_orm(indexed)]
    pub author_id: String,

    /// Question or answer ID (polymorphic, no foreign key)
    pub target_id: String,

    pub target_kind: TargetKind,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    pub created_at: DateTimeWithTimeZone,
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
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Author.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
