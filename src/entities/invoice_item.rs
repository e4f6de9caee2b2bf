use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::money::{Money, BASIS_POINTS_PER_UNIT};

/// Per-line discount, stored as JSON on the item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Discount {
    /// Fraction of the gross line amount, 10000 = 100%.
    Percent { basis_points: i64 },
    /// Fixed amount off the gross line amount.
    Amount { cents: i64 },
}

impl Discount {
    /// Amount taken off `gross`, rounded half up for percentages.
    pub fn amount_off(&self, gross: Money) -> Result<Money, ServiceError> {
        match *self {
            Discount::Percent { basis_points } => {
                if !(0..=BASIS_POINTS_PER_UNIT).contains(&basis_points) {
                    return Err(ServiceError::ValidationError(format!(
                        "discount of {} basis points is outside 0..=10000",
                        basis_points
                    )));
                }
                gross
                    .basis_points(basis_points)
                    .ok_or_else(|| ServiceError::ValidationError("amount overflow".to_string()))
            }
            Discount::Amount { cents } => {
                if cents < 0 || cents > gross.cents() {
                    return Err(ServiceError::ValidationError(format!(
                        "discount of {} exceeds line amount {}",
                        Money::from_cents(cents),
                        gross
                    )));
                }
                Ok(Money::from_cents(cents))
            }
        }
    }

    pub fn to_json(&self) -> Result<Json, ServiceError> {
        serde_json::to_value(self).map_err(|e| ServiceError::InternalError(e.to_string()))
    }

    pub fn from_json(value: &Json) -> Result<Self, ServiceError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ServiceError::ValidationError(format!("invalid discount: {}", e)))
    }
}

/// `quantity * unit_price - discount`.
pub fn line_total(
    quantity: i64,
    unit_price: Money,
    discount: Option<&Discount>,
) -> Result<Money, ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(
            "quantity must be at least 1".to_string(),
        ));
    }
    if unit_price.cents() < 0 {
        return Err(ServiceError::ValidationError(
            "unit price must not be negative".to_string(),
        ));
    }
    let gross = unit_price
        .checked_mul_quantity(quantity)
        .ok_or_else(|| ServiceError::ValidationError("amount overflow".to_string()))?;
    let off = match discount {
        Some(discount) => discount.amount_off(gross)?,
        None => Money::ZERO,
    };
    Ok((gross - off).non_negative())
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoice_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub position: i32,
    pub label: String,
    pub product_id: Option<Uuid>,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub discount: Option<Json>,
    pub line_total_cents: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::invoice::Entity",
        from = "Column::InvoiceId",
        to = "super::invoice::Column::Id"
    )]
    Invoice,
}

impl Related<super::invoice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoice.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn discount(&self) -> Result<Option<Discount>, ServiceError> {
        self.discount.as_ref().map(Discount::from_json).transpose()
    }

    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }
}
