//! Vote entity (one user's current vote on a question or answer).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// The kind of document a vote targets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum TargetKind {
    #[sea_orm(string_value = "Question")]
    Question,
    #[sea_orm(string_value = "Answer")]
    Answer,
}

impl TargetKind {
    /// Stored name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Question => "Question",
            Self::Answer => "Answer",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vote value. Stored as `1` or `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteValue {
    Up,
    Down,
}

impl VoteValue {
    /// Numeric form as stored in the `value` column.
    #[must_use]
    pub const fn as_i16(self) -> i16 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }

    /// Parse the stored numeric form.
    #[must_use]
    pub const fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(Self::Up),
            -1 => Some(Self::Down),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vote")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The voting user
    pub user_id: String,

    /// Question or answer ID (polymorphic, no foreign key)
    pub target_id: String,

    pub target_kind: TargetKind,

    /// `1` or `-1`
    pub value: i16,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Typed vote value. `None` only if the row bypassed the CHECK constraint.
    #[must_use]
    pub const fn vote_value(&self) -> Option<VoteValue> {
        VoteValue::from_i16(self.value)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
