use sea_orm::{ActiveValue, entity::prelude::*};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "transaction_tags")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub owner_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub transaction_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub tag: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    pub(crate) fn new(owner_id: &str, transaction_id: &str, tag: &str) -> Self {
        Self {
            owner_id: ActiveValue::Set(owner_id.to_string()),
            transaction_id: ActiveValue::Set(transaction_id.to_string()),
            tag: ActiveValue::Set(tag.to_string()),
        }
    }
}
