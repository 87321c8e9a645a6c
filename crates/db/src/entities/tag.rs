//! Tag entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A question tag and how many questions have used it.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tag")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The tag name (trimmed, lowercase)
    #[sea_orm(unique)]
    pub name: String,

    /// Number of questions created with this tag
    #[sea_orm(default_value = 0)]
    pub questions_count: i32,

    #[sea_orm(nullable)]
    pub last_used_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
