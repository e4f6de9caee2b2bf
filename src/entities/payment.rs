use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::money::Money;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "WIRE")]
    Wire,
    #[sea_orm(string_value = "CARD")]
    Card,
    #[sea_orm(string_value = "CHECK")]
    Check,
    #[sea_orm(string_value = "CASH")]
    Cash,
    #[sea_orm(string_value = "OTHER")]
    Other,
}

/// Structured side-channel data attached to a payment. The key set is closed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_last4: Option<String>,
    /// Written by a manual SENT -> PAID transition for the outstanding balance.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub settlement: bool,
}

impl PaymentMetadata {
    pub fn settlement() -> Self {
        Self {
            settlement: true,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if let Some(last4) = &self.card_last4 {
            if last4.len() != 4 || !last4.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ServiceError::ValidationError(
                    "card_last4 must be exactly four digits".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<Json, ServiceError> {
        serde_json::to_value(self).map_err(|e| ServiceError::InternalError(e.to_string()))
    }

    pub fn from_json(value: &Json) -> Result<Self, ServiceError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ServiceError::ValidationError(format!("invalid payment metadata: {}", e)))
    }
}

/// A payment against an invoice. Reversal soft-deletes; rows are never removed.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub business_id: Uuid,
    pub invoice_id: Uuid,
    pub amount_cents: i64,
    pub paid_at: DateTime<Utc>,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub note: Option<String>,
    pub metadata: Option<Json>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
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
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    pub fn is_reversed(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn metadata(&self) -> Result<Option<PaymentMetadata>, ServiceError> {
        self.metadata.as_ref().map(PaymentMetadata::from_json).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_rejects_unknown_keys() {
        let value = serde_json::json!({"processor": "stripe", "status": "ok"});
        assert!(PaymentMetadata::from_json(&value).is_err());
    }

    #[test]
    fn settlement_metadata_serializes_compactly() {
        let json = PaymentMetadata::settlement().to_json().unwrap();
        assert_eq!(json, serde_json::json!({"settlement": true}));
        let empty = PaymentMetadata::default().to_json().unwrap();
        assert_eq!(empty, serde_json::json!({}));
    }

    #[test]
    fn card_last4_must_be_digits() {
        let meta = PaymentMetadata {
            card_last4: Some("12a4".into()),
            ..Default::default()
        };
        assert!(meta.validate().is_err());
        let meta = PaymentMetadata {
            card_last4: Some("4242".into()),
            ..Default::default()
        };
        assert!(meta.validate().is_ok());
    }
}
