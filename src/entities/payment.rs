use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One active payment record per order. `card_token` holds the opaque PSP
/// tokenization output, never card data. A pending PIX payment past
/// `pix_expires_at` resolves to failed and the client stops polling.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub method: String,
    pub status: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub amount: Decimal,
    #[sea_orm(nullable)]
    pub card_token: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_charge_id: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub pix_qr_code: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub pix_qr_code_base64: Option<String>,
    #[sea_orm(nullable)]
    pub pix_expires_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub boleto_barcode: Option<String>,
    #[sea_orm(nullable)]
    pub boleto_url: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
