//! Financial recording: ledger entries and income records that mirror an
//! invoice being paid, and their reversal.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::finance::{self, FinanceKind, INVOICE_PAYMENT_CATEGORY};
use crate::entities::invoice;
use crate::entities::ledger_entry::{self, ConsumedLine, LedgerDetails, LedgerSourceType};
use crate::errors::ServiceError;
use crate::money::Money;
use crate::services::inventory_reservation_service::ConsumedItem;
use crate::services::ActorContext;

/// Records written when an invoice becomes PAID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidBookings {
    pub cash_sale_entry_id: Uuid,
    pub finance_record_id: Uuid,
    pub stock_consumption_entry_id: Option<Uuid>,
}

/// What a reversal undid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversedBookings {
    pub cash_sale_entries_deleted: u64,
    pub finance_records_voided: u64,
}

/// Cost of goods for consumed lines: Σ quantity × unit cost.
pub fn consumption_cost(consumed: &[ConsumedItem]) -> Result<Money, ServiceError> {
    consumed.iter().try_fold(Money::ZERO, |acc, item| {
        let line = Money::from_cents(item.unit_cost_cents)
            .checked_mul_quantity(item.quantity)
            .ok_or_else(|| ServiceError::ValidationError("amount overflow".to_string()))?;
        acc.try_add(line)
    })
}

#[derive(Clone)]
pub struct AccountingService {
    db_pool: Arc<DbPool>,
}

impl AccountingService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Books the income side of a paid invoice: cash-sale ledger entry,
    /// income record, and a stock-consumption entry when stock was consumed.
    /// Safe to call again for the same invoice.
    pub async fn record_invoice_paid(
        &self,
        txn: &DatabaseTransaction,
        ctx: ActorContext,
        invoice: &invoice::Model,
        paid_at: DateTime<Utc>,
        consumed: &[ConsumedItem],
    ) -> Result<PaidBookings, ServiceError> {
        let cash_sale = upsert_ledger_entry(
            txn,
            ctx,
            LedgerSourceType::CashSale,
            invoice,
            invoice.total(),
            paid_at,
            LedgerDetails::CashSale {
                invoice_number: invoice.invoice_number.clone(),
            },
        )
        .await?;

        let finance_record = ensure_income_record(txn, ctx, invoice, paid_at).await?;

        let stock_consumption_entry_id = if consumed.is_empty() {
            None
        } else {
            let lines = consumed
                .iter()
                .map(|item| ConsumedLine {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    movement_id: item.movement_id,
                    unit_cost_cents: item.unit_cost_cents,
                })
                .collect();
            let entry = upsert_ledger_entry(
                txn,
                ctx,
                LedgerSourceType::StockConsumption,
                invoice,
                consumption_cost(consumed)?,
                paid_at,
                LedgerDetails::StockConsumption { lines },
            )
            .await?;
            Some(entry.id)
        };

        info!(
            invoice_id = %invoice.id,
            cash_sale_entry_id = %cash_sale.id,
            finance_record_id = %finance_record.id,
            stock_consumption_entry_id = ?stock_consumption_entry_id,
            "Recorded paid invoice bookings"
        );

        Ok(PaidBookings {
            cash_sale_entry_id: cash_sale.id,
            finance_record_id: finance_record.id,
            stock_consumption_entry_id,
        })
    }

    /// Undoes the income side of a paid invoice. Stock consumption stays.
    pub async fn reverse_invoice_paid(
        &self,
        txn: &DatabaseTransaction,
        ctx: ActorContext,
        invoice: &invoice::Model,
    ) -> Result<ReversedBookings, ServiceError> {
        let deleted = ledger_entry::Entity::delete_many()
            .filter(ledger_entry::Column::BusinessId.eq(ctx.business_id))
            .filter(ledger_entry::Column::SourceType.eq(LedgerSourceType::CashSale))
            .filter(ledger_entry::Column::SourceId.eq(invoice.id))
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;

        let voided = finance::Entity::update_many()
            .col_expr(finance::Column::DeletedAt, Expr::value(Utc::now()))
            .filter(finance::Column::BusinessId.eq(ctx.business_id))
            .filter(finance::Column::InvoiceId.eq(invoice.id))
            .filter(finance::Column::Category.eq(INVOICE_PAYMENT_CATEGORY))
            .filter(finance::Column::DeletedAt.is_null())
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;

        counter!("billing.accounting.reversals", 1);
        info!(
            invoice_id = %invoice.id,
            cash_sale_entries_deleted = deleted.rows_affected,
            finance_records_voided = voided.rows_affected,
            "Reversed paid invoice bookings"
        );

        Ok(ReversedBookings {
            cash_sale_entries_deleted: deleted.rows_affected,
            finance_records_voided: voided.rows_affected,
        })
    }

    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn ledger_entries_for_invoice(
        &self,
        ctx: ActorContext,
        invoice_id: Uuid,
    ) -> Result<Vec<ledger_entry::Model>, ServiceError> {
        ledger_entry::Entity::find()
            .filter(ledger_entry::Column::BusinessId.eq(ctx.business_id))
            .filter(ledger_entry::Column::SourceId.eq(invoice_id))
            .order_by_asc(ledger_entry::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn finance_records_for_invoice(
        &self,
        ctx: ActorContext,
        invoice_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<finance::Model>, ServiceError> {
        let mut query = finance::Entity::find()
            .filter(finance::Column::BusinessId.eq(ctx.business_id))
            .filter(finance::Column::InvoiceId.eq(invoice_id));
        if !include_deleted {
            query = query.filter(finance::Column::DeletedAt.is_null());
        }
        query
            .order_by_asc(finance::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}

/// Insert-or-update on the `(business_id, source_type, source_id)` key.
async fn upsert_ledger_entry(
    txn: &DatabaseTransaction,
    ctx: ActorContext,
    source_type: LedgerSourceType,
    invoice: &invoice::Model,
    amount: Money,
    occurred_at: DateTime<Utc>,
    details: LedgerDetails,
) -> Result<ledger_entry::Model, ServiceError> {
    let now = Utc::now();
    let entry = ledger_entry::ActiveModel {
        id: Set(Uuid::new_v4()),
        business_id: Set(ctx.business_id),
        source_type: Set(source_type),
        source_id: Set(invoice.id),
        amount_cents: Set(amount.cents()),
        currency: Set(invoice.currency.clone()),
        occurred_at: Set(occurred_at),
        details: Set(Some(details.to_json()?)),
        created_by: Set(ctx.actor_id),
        created_at: Set(now),
        updated_at: Set(now),
    };

    ledger_entry::Entity::insert(entry)
        .on_conflict(
            OnConflict::columns([
                ledger_entry::Column::BusinessId,
                ledger_entry::Column::SourceType,
                ledger_entry::Column::SourceId,
            ])
            .update_columns([
                ledger_entry::Column::AmountCents,
                ledger_entry::Column::OccurredAt,
                ledger_entry::Column::Details,
                ledger_entry::Column::UpdatedAt,
            ])
            .to_owned(),
        )
        .exec_without_returning(txn)
        .await
        .map_err(ServiceError::db_error)?;

    counter!("billing.ledger.upserts", 1, "source_type" => source_type.to_string());

    ledger_entry::Entity::find()
        .filter(ledger_entry::Column::BusinessId.eq(ctx.business_id))
        .filter(ledger_entry::Column::SourceType.eq(source_type))
        .filter(ledger_entry::Column::SourceId.eq(invoice.id))
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::InternalError("ledger upsert left no row".to_string()))
}

/// Live income record for the invoice, created on first call.
async fn ensure_income_record(
    txn: &DatabaseTransaction,
    ctx: ActorContext,
    invoice: &invoice::Model,
    occurred_at: DateTime<Utc>,
) -> Result<finance::Model, ServiceError> {
    let existing = finance::Entity::find()
        .filter(finance::Column::BusinessId.eq(ctx.business_id))
        .filter(finance::Column::InvoiceId.eq(invoice.id))
        .filter(finance::Column::Category.eq(INVOICE_PAYMENT_CATEGORY))
        .filter(finance::Column::DeletedAt.is_null())
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?;
    if let Some(existing) = existing {
        return Ok(existing);
    }

    let note = match &invoice.invoice_number {
        Some(number) => format!("Payment for invoice {}", number),
        None => format!("Payment for invoice {}", invoice.id),
    };
    finance::ActiveModel {
        id: Set(Uuid::new_v4()),
        business_id: Set(ctx.business_id),
        invoice_id: Set(Some(invoice.id)),
        kind: Set(FinanceKind::Income),
        category: Set(INVOICE_PAYMENT_CATEGORY.to_string()),
        amount_cents: Set(invoice.total_cents),
        currency: Set(invoice.currency.clone()),
        occurred_at: Set(occurred_at),
        note: Set(Some(note)),
        created_by: Set(ctx.actor_id),
        created_at: Set(Utc::now()),
        deleted_at: Set(None),
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumed(quantity: i64, unit_cost_cents: i64) -> ConsumedItem {
        ConsumedItem {
            product_id: Uuid::new_v4(),
            quantity,
            movement_id: Uuid::new_v4(),
            unit_cost_cents,
        }
    }

    #[test]
    fn consumption_cost_sums_lines() {
        let lines = vec![consumed(3, 250), consumed(2, 1000)];
        assert_eq!(consumption_cost(&lines).unwrap(), Money::from_cents(2750));
        assert_eq!(consumption_cost(&[]).unwrap(), Money::ZERO);
    }

    #[test]
    fn consumption_cost_reports_overflow() {
        let lines = vec![consumed(2, i64::MAX)];
        assert!(consumption_cost(&lines).is_err());
    }
}
