use sea_orm::entity::prelude::*;

/// One row per satisfied-or-claimed checkpoint. Uniqueness over
/// (session_id, page_index, scope_kind, scope_ordinal) is what turns a
/// duplicate-claim race into a harmless constraint violation.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "checkpoint_completions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_id: i64,
    pub page_index: i32,
    pub scope_kind: String,
    pub scope_ordinal: i64,
    pub satisfied: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
