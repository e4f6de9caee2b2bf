use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::money::Money;

/// What produced a ledger entry. Together with `source_id` this is the
/// idempotency key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerSourceType {
    /// Income recognition for a paid invoice.
    #[sea_orm(string_value = "CASH_SALE")]
    CashSale,
    /// Cost of goods leaving stock when an invoice is paid.
    #[sea_orm(string_value = "STOCK_CONSUMPTION")]
    StockConsumption,
}

/// One consumed product line on a stock-consumption entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedLine {
    pub product_id: Uuid,
    pub quantity: i64,
    pub movement_id: Uuid,
    pub unit_cost_cents: i64,
}

/// Typed payload stored in `details`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerDetails {
    CashSale {
        invoice_number: Option<String>,
    },
    StockConsumption {
        lines: Vec<ConsumedLine>,
    },
}

impl LedgerDetails {
    pub fn to_json(&self) -> Result<Json, ServiceError> {
        serde_json::to_value(self).map_err(|e| ServiceError::InternalError(e.to_string()))
    }
}

/// Keyed record of a financial or stock event, unique on
/// `(business_id, source_type, source_id)`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub business_id: Uuid,
    pub source_type: LedgerSourceType,
    /// Invoice id for both source types.
    pub source_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
    pub details: Option<Json>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    pub fn details(&self) -> Result<Option<LedgerDetails>, ServiceError> {
        self.details
            .as_ref()
            .map(|value| {
                serde_json::from_value(value.clone())
                    .map_err(|e| ServiceError::InternalError(format!("corrupt ledger details: {}", e)))
            })
            .transpose()
    }
}
