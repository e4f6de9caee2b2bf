//! Payment accrual ledger.
//!
//! Payments accrue against a SENT invoice under its row lock; the paid sum
//! can never exceed the invoice total. Reaching the total promotes the invoice
//! to PAID, and a reversal that reopens a balance demotes it to SENT.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::invoice::{self, InvoiceStatus};
use crate::entities::payment::{self, PaymentMetadata, PaymentMethod};
use crate::errors::ServiceError;
use crate::money::Money;
use crate::services::invoicing::{lock_invoice, InvoiceService};
use crate::services::ActorContext;

/// A payment to record. Amount and timestamp are pre-validated by the caller;
/// the ledger still rejects non-positive amounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub invoice_id: Uuid,
    pub amount_cents: i64,
    pub paid_at: DateTime<Utc>,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub note: Option<String>,
    pub metadata: Option<PaymentMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub payment: payment::Model,
    pub invoice: invoice::Model,
    /// True when this payment moved the invoice to PAID.
    pub promoted: bool,
    pub remaining_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalOutcome {
    pub payment: payment::Model,
    pub invoice: invoice::Model,
    /// True when the reversal moved the invoice back to SENT.
    pub demoted: bool,
    pub remaining_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub invoice_id: Uuid,
    pub status: InvoiceStatus,
    pub total_cents: i64,
    pub paid_cents: i64,
    pub remaining_cents: i64,
}

/// `max(0, total - paid)`.
pub fn remaining_balance(total: Money, paid: Money) -> Money {
    (total - paid).non_negative()
}

#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    invoices: Arc<InvoiceService>,
}

impl PaymentService {
    pub fn new(db_pool: Arc<DbPool>, invoices: Arc<InvoiceService>) -> Self {
        Self { db_pool, invoices }
    }

    /// Records a payment. Fails with `Overpay` if it exceeds the remaining
    /// balance; nothing is written in that case.
    #[instrument(skip(self, input), fields(business_id = %ctx.business_id, invoice_id = %input.invoice_id, amount_cents = input.amount_cents))]
    pub async fn record_payment(
        &self,
        ctx: ActorContext,
        input: NewPayment,
    ) -> Result<PaymentOutcome, ServiceError> {
        if input.amount_cents <= 0 {
            return Err(ServiceError::ValidationError(
                "payment amount must be positive".to_string(),
            ));
        }
        if let Some(metadata) = &input.metadata {
            metadata.validate()?;
        }

        let started = Instant::now();
        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;
        let invoice = lock_invoice(&txn, ctx.business_id, input.invoice_id).await?;

        match invoice.status {
            InvoiceStatus::Sent => {}
            InvoiceStatus::Paid => {
                return Err(self.reject_overpay(&invoice, input.amount_cents, Money::ZERO));
            }
            status => {
                counter!("billing.payments.rejected", 1, "reason" => "status");
                return Err(ServiceError::InvalidOperation(format!(
                    "payments cannot be recorded against a {} invoice",
                    status
                )));
            }
        }

        let already_paid = sum_paid(&txn, invoice.id).await?;
        let remaining = remaining_balance(invoice.total(), already_paid);
        let amount = Money::from_cents(input.amount_cents);
        if amount > remaining {
            return Err(self.reject_overpay(&invoice, input.amount_cents, remaining));
        }

        let payment = insert_payment(&txn, ctx, &input).await?;
        let paid = already_paid.try_add(amount)?;

        let (invoice, promoted) = if paid >= invoice.total() {
            let (invoice, _) = self
                .invoices
                .apply_paid(&txn, ctx, invoice, payment.paid_at)
                .await?;
            (invoice, true)
        } else {
            (invoice, false)
        };
        let remaining_cents = remaining_balance(invoice.total(), paid).cents();

        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("billing.payments.recorded", 1);
        histogram!("billing.payments.record.duration", started.elapsed());
        info!(
            payment_id = %payment.id,
            invoice_id = %invoice.id,
            amount_cents = payment.amount_cents,
            remaining_cents,
            promoted,
            "Recorded payment"
        );

        Ok(PaymentOutcome {
            payment,
            invoice,
            promoted,
            remaining_cents,
        })
    }

    /// Soft-deletes a payment. If the invoice was PAID and now has a balance it
    /// returns to SENT and its income bookings are undone.
    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn reverse_payment(
        &self,
        ctx: ActorContext,
        payment_id: Uuid,
    ) -> Result<ReversalOutcome, ServiceError> {
        let started = Instant::now();
        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        let target = payment::Entity::find_by_id(payment_id)
            .filter(payment::Column::BusinessId.eq(ctx.business_id))
            .filter(payment::Column::DeletedAt.is_null())
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("payment", payment_id))?;

        let invoice = lock_invoice(&txn, ctx.business_id, target.invoice_id).await?;

        // Re-checked under the invoice lock: a concurrent reversal may have won.
        let now = Utc::now();
        let soft_deleted = payment::Entity::update_many()
            .col_expr(payment::Column::DeletedAt, Expr::value(now))
            .col_expr(payment::Column::DeletedBy, Expr::value(ctx.actor_id))
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::DeletedAt.is_null())
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if soft_deleted.rows_affected == 0 {
            return Err(ServiceError::not_found("payment", payment_id));
        }

        let paid = sum_paid(&txn, invoice.id).await?;
        let remaining = remaining_balance(invoice.total(), paid);

        let (invoice, demoted) =
            if invoice.status == InvoiceStatus::Paid && remaining.is_positive() {
                (self.invoices.apply_unpaid(&txn, ctx, invoice).await?, true)
            } else {
                (invoice, false)
            };

        let payment = payment::Entity::find_by_id(payment_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("payment", payment_id))?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("billing.payments.reversed", 1);
        histogram!("billing.payments.reverse.duration", started.elapsed());
        info!(
            %payment_id,
            invoice_id = %invoice.id,
            remaining_cents = remaining.cents(),
            demoted,
            "Reversed payment"
        );

        Ok(ReversalOutcome {
            payment,
            invoice,
            demoted,
            remaining_cents: remaining.cents(),
        })
    }

    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn payment_summary(
        &self,
        ctx: ActorContext,
        invoice_id: Uuid,
    ) -> Result<PaymentSummary, ServiceError> {
        let db = &*self.db_pool;
        let invoice = invoice::Entity::find_by_id(invoice_id)
            .filter(invoice::Column::BusinessId.eq(ctx.business_id))
            .filter(invoice::Column::DeletedAt.is_null())
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("invoice", invoice_id))?;
        let paid = sum_paid(db, invoice.id).await?;

        Ok(PaymentSummary {
            invoice_id: invoice.id,
            status: invoice.status,
            total_cents: invoice.total_cents,
            paid_cents: paid.cents(),
            remaining_cents: remaining_balance(invoice.total(), paid).cents(),
        })
    }

    /// Payments of an invoice in the order they were paid.
    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn list_payments(
        &self,
        ctx: ActorContext,
        invoice_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<payment::Model>, ServiceError> {
        let mut query = payment::Entity::find()
            .filter(payment::Column::BusinessId.eq(ctx.business_id))
            .filter(payment::Column::InvoiceId.eq(invoice_id));
        if !include_deleted {
            query = query.filter(payment::Column::DeletedAt.is_null());
        }
        query
            .order_by_asc(payment::Column::PaidAt)
            .order_by_asc(payment::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    fn reject_overpay(
        &self,
        invoice: &invoice::Model,
        attempted_cents: i64,
        remaining: Money,
    ) -> ServiceError {
        warn!(
            invoice_id = %invoice.id,
            attempted_cents,
            remaining_cents = remaining.cents(),
            "Rejected overpayment"
        );
        counter!("billing.payments.rejected", 1, "reason" => "overpay");
        ServiceError::Overpay {
            attempted_cents,
            remaining_cents: remaining.cents(),
        }
    }
}

/// Sum of non-deleted payments.
pub(crate) async fn sum_paid<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<Money, ServiceError> {
    let total = payment::Entity::find()
        .select_only()
        .column_as(
            Expr::cust("CAST(COALESCE(SUM(payments.amount_cents), 0) AS BIGINT)"),
            "paid",
        )
        .filter(payment::Column::InvoiceId.eq(invoice_id))
        .filter(payment::Column::DeletedAt.is_null())
        .into_tuple::<i64>()
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(Money::from_cents(total.unwrap_or(0)))
}

pub(crate) async fn insert_payment<C: ConnectionTrait>(
    conn: &C,
    ctx: ActorContext,
    input: &NewPayment,
) -> Result<payment::Model, ServiceError> {
    let metadata = input
        .metadata
        .as_ref()
        .map(PaymentMetadata::to_json)
        .transpose()?;
    payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        business_id: Set(ctx.business_id),
        invoice_id: Set(input.invoice_id),
        amount_cents: Set(input.amount_cents),
        paid_at: Set(input.paid_at),
        method: Set(input.method),
        reference: Set(input.reference.clone()),
        note: Set(input.note.clone()),
        metadata: Set(metadata),
        created_by: Set(ctx.actor_id),
        created_at: Set(Utc::now()),
        deleted_at: Set(None),
        deleted_by: Set(None),
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)
}
