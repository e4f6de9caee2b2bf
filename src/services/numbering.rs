//! Human-readable document numbers.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QuerySelect,
    Set,
};
use tracing::debug;
use uuid::Uuid;

use crate::entities::document_sequence;
use crate::errors::ServiceError;

const INVOICE_DOCUMENT: &str = "invoice";

/// Hands out invoice numbers inside the caller's transaction, so a rolled
/// back transition also gives its number back.
#[async_trait]
pub trait DocumentNumbering: Send + Sync {
    async fn next_invoice_number(
        &self,
        txn: &DatabaseTransaction,
        business_id: Uuid,
        issued_at: DateTime<Utc>,
    ) -> Result<String, ServiceError>;
}

/// Gap-free yearly counter per business: `INV-2026-000001`.
#[derive(Debug, Clone)]
pub struct SequentialNumbering {
    prefix: String,
}

impl SequentialNumbering {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn format(&self, year: i32, value: i64) -> String {
        format!("{}-{}-{:06}", self.prefix, year, value)
    }
}

impl Default for SequentialNumbering {
    fn default() -> Self {
        Self::new("INV")
    }
}

#[async_trait]
impl DocumentNumbering for SequentialNumbering {
    async fn next_invoice_number(
        &self,
        txn: &DatabaseTransaction,
        business_id: Uuid,
        issued_at: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let year = issued_at.year();
        let now = Utc::now();

        // Make sure the counter row exists, then take its lock.
        let seed = document_sequence::ActiveModel {
            id: Set(Uuid::new_v4()),
            business_id: Set(business_id),
            document_type: Set(INVOICE_DOCUMENT.to_string()),
            year: Set(year),
            last_value: Set(0),
            updated_at: Set(now),
        };
        document_sequence::Entity::insert(seed)
            .on_conflict(
                OnConflict::columns([
                    document_sequence::Column::BusinessId,
                    document_sequence::Column::DocumentType,
                    document_sequence::Column::Year,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(txn)
            .await
            .map_err(ServiceError::db_error)?;

        let sequence = document_sequence::Entity::find()
            .filter(document_sequence::Column::BusinessId.eq(business_id))
            .filter(document_sequence::Column::DocumentType.eq(INVOICE_DOCUMENT))
            .filter(document_sequence::Column::Year.eq(year))
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::InternalError("document sequence row vanished".to_string())
            })?;

        let next = sequence.last_value + 1;
        let mut active: document_sequence::ActiveModel = sequence.into();
        active.last_value = Set(next);
        active.updated_at = Set(now);
        active.update(txn).await.map_err(ServiceError::db_error)?;

        let number = self.format(year, next);
        debug!(%business_id, %number, "Assigned invoice number");
        Ok(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_zero_padded_numbers() {
        let numbering = SequentialNumbering::default();
        assert_eq!(numbering.format(2026, 1), "INV-2026-000001");
        assert_eq!(numbering.format(2026, 1_234_567), "INV-2026-1234567");
        assert_eq!(SequentialNumbering::new("BILL").format(2025, 42), "BILL-2025-000042");
    }
}
