//! User entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(unique)]
    pub username: String,

    pub username_lower: String,

    /// Argon2 password hash
    #[serde(skip_serializing)]
    pub password: String,

    /// Access token
    #[sea_orm(unique, nullable)]
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Cumulative reputation. Adjusted incrementally by vote transactions; may be negative.
    #[sea_orm(default_value = 0)]
    pub reputation: i64,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::question::Entity")]
    Questions,

    #[sea_orm(has_many = "super::answer::Entity")]
    Answers,

    #[sea_orm(has_many = "super::vote::Entity")]
    Votes,
}

impl Related<super::question::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Questions.def()
    }
}

impl Related<super::answer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Answers.def()
    }
}

impl Related<super::vote::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Votes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
