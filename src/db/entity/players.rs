use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "players")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_id: i64,
    pub subsession_id: i64,
    pub participant_id: i64,
    pub group_id: Option<i64>,
    pub id_in_group: Option<i32>,
    pub round_number: i32,
    pub arrived_by_time: bool,
    pub grouped_by_time: bool,
    pub arrival_time: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
