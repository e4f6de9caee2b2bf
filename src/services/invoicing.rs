//! Invoice state machine.
//!
//! `DRAFT -> {SENT, CANCELLED}`, `SENT -> {PAID, CANCELLED}`; PAID and
//! CANCELLED are terminal. Every transition locks the invoice row and runs its
//! side effects (numbering, reservations, bookings) in the same transaction as
//! the status write.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::{validate_currency, AppConfig, StockPolicy};
use crate::db::DbPool;
use crate::entities::invoice::{self, InvoiceStatus};
use crate::entities::invoice_item::{self, line_total, Discount};
use crate::entities::payment::{PaymentMetadata, PaymentMethod};
use crate::entities::{product, project};
use crate::errors::ServiceError;
use crate::money::Money;
use crate::services::accounting::{AccountingService, PaidBookings};
use crate::services::inventory::InventoryService;
use crate::services::inventory_reservation_service::InventoryReservationService;
use crate::services::numbering::DocumentNumbering;
use crate::services::payments::{self, NewPayment};
use crate::services::ActorContext;

/// Invoice behaviour knobs taken from configuration.
#[derive(Debug, Clone)]
pub struct InvoiceSettings {
    pub default_currency: String,
    pub stock_policy: StockPolicy,
}

impl Default for InvoiceSettings {
    fn default() -> Self {
        Self {
            default_currency: "USD".to_string(),
            stock_policy: StockPolicy::AllowOversell,
        }
    }
}

impl From<&AppConfig> for InvoiceSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            default_currency: cfg.default_currency.clone(),
            stock_policy: cfg.stock_policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewInvoiceItem {
    #[validate(length(min = 1, max = 255))]
    pub label: String,
    pub product_id: Option<Uuid>,
    #[validate(range(min = 1))]
    pub quantity: i64,
    #[validate(range(min = 0))]
    pub unit_price_cents: i64,
    pub discount: Option<Discount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewInvoice {
    pub project_id: Uuid,
    pub client_id: Option<Uuid>,
    pub quote_id: Option<Uuid>,
    /// Falls back to the configured default currency.
    pub currency: Option<String>,
    #[validate(range(min = 0, max = 100))]
    pub deposit_percent: i32,
    pub due_at: Option<DateTime<Utc>>,
    #[validate(length(min = 1))]
    pub items: Vec<NewInvoiceItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub total: Money,
    pub deposit: Money,
    pub balance: Money,
}

/// `total = Σ line totals`, `deposit = total × deposit% (half up)`,
/// `balance = total - deposit`.
pub fn compute_totals(
    line_totals: impl IntoIterator<Item = Money>,
    deposit_percent: i32,
) -> Result<InvoiceTotals, ServiceError> {
    if !(0..=100).contains(&deposit_percent) {
        return Err(ServiceError::ValidationError(format!(
            "deposit percent {} is outside 0..=100",
            deposit_percent
        )));
    }
    let total = line_totals
        .into_iter()
        .try_fold(Money::ZERO, |acc, line| acc.try_add(line))?;
    let deposit = total
        .percent(i64::from(deposit_percent))
        .ok_or_else(|| ServiceError::ValidationError("amount overflow".to_string()))?;
    Ok(InvoiceTotals {
        total,
        deposit,
        balance: total - deposit,
    })
}

/// An invoice with its items ordered by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceWithItems {
    pub invoice: invoice::Model,
    pub items: Vec<invoice_item::Model>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub invoice: InvoiceWithItems,
    /// Set when entering PAID consumed stock.
    pub stock_consumption_entry_id: Option<Uuid>,
    /// False for a same-status request.
    pub changed: bool,
}

#[derive(Clone)]
pub struct InvoiceService {
    db_pool: Arc<DbPool>,
    settings: InvoiceSettings,
    inventory: Arc<InventoryService>,
    reservations: Arc<InventoryReservationService>,
    accounting: Arc<AccountingService>,
    numbering: Arc<dyn DocumentNumbering>,
}

impl InvoiceService {
    pub fn new(
        db_pool: Arc<DbPool>,
        settings: InvoiceSettings,
        inventory: Arc<InventoryService>,
        reservations: Arc<InventoryReservationService>,
        accounting: Arc<AccountingService>,
        numbering: Arc<dyn DocumentNumbering>,
    ) -> Self {
        Self {
            db_pool,
            settings,
            inventory,
            reservations,
            accounting,
            numbering,
        }
    }

    /// Creates a DRAFT invoice with the given items frozen onto it.
    #[instrument(skip(self, input), fields(business_id = %ctx.business_id, project_id = %input.project_id))]
    pub async fn create_invoice(
        &self,
        ctx: ActorContext,
        input: NewInvoice,
    ) -> Result<InvoiceWithItems, ServiceError> {
        input.validate()?;
        for item in &input.items {
            item.validate()?;
        }
        let currency = input
            .currency
            .clone()
            .unwrap_or_else(|| self.settings.default_currency.clone());
        validate_currency(&currency)
            .map_err(|_| ServiceError::ValidationError(format!("invalid currency '{}'", currency)))?;

        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        project::Entity::find_by_id(input.project_id)
            .filter(project::Column::BusinessId.eq(ctx.business_id))
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "project {} does not belong to this business",
                    input.project_id
                ))
            })?;
        check_products(&txn, ctx.business_id, &input.items).await?;

        let priced = price_items(&input.items)?;
        let totals = compute_totals(priced.iter().copied(), input.deposit_percent)?;
        let now = Utc::now();
        let invoice_id = Uuid::new_v4();

        let invoice = invoice::ActiveModel {
            id: Set(invoice_id),
            business_id: Set(ctx.business_id),
            project_id: Set(input.project_id),
            client_id: Set(input.client_id),
            quote_id: Set(input.quote_id),
            invoice_number: Set(None),
            status: Set(InvoiceStatus::Draft),
            currency: Set(currency),
            deposit_percent: Set(input.deposit_percent),
            total_cents: Set(totals.total.cents()),
            deposit_cents: Set(totals.deposit.cents()),
            balance_cents: Set(totals.balance.cents()),
            issued_at: Set(None),
            due_at: Set(input.due_at),
            paid_at: Set(None),
            created_by: Set(ctx.actor_id),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        let items = insert_items(&txn, invoice_id, &input.items, &priced).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(
            invoice_id = %invoice.id,
            total_cents = invoice.total_cents,
            items = items.len(),
            "Created draft invoice"
        );
        Ok(InvoiceWithItems { invoice, items })
    }

    /// Replaces all line items of a DRAFT invoice and recomputes its totals.
    #[instrument(skip(self, items), fields(business_id = %ctx.business_id))]
    pub async fn replace_items(
        &self,
        ctx: ActorContext,
        invoice_id: Uuid,
        items: Vec<NewInvoiceItem>,
    ) -> Result<InvoiceWithItems, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "an invoice needs at least one item".to_string(),
            ));
        }
        for item in &items {
            item.validate()?;
        }

        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;
        let invoice = lock_invoice(&txn, ctx.business_id, invoice_id).await?;
        if !invoice.status.items_editable() {
            return Err(ServiceError::InvalidOperation(format!(
                "items of a {} invoice cannot be replaced",
                invoice.status
            )));
        }
        check_products(&txn, ctx.business_id, &items).await?;

        let priced = price_items(&items)?;
        let totals = compute_totals(priced.iter().copied(), invoice.deposit_percent)?;

        invoice_item::Entity::delete_many()
            .filter(invoice_item::Column::InvoiceId.eq(invoice.id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        let new_items = insert_items(&txn, invoice.id, &items, &priced).await?;

        let mut active: invoice::ActiveModel = invoice.into();
        active.total_cents = Set(totals.total.cents());
        active.deposit_cents = Set(totals.deposit.cents());
        active.balance_cents = Set(totals.balance.cents());
        active.updated_at = Set(Utc::now());
        let invoice = active.update(&txn).await.map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(invoice_id = %invoice.id, total_cents = invoice.total_cents, "Replaced invoice items");
        Ok(InvoiceWithItems {
            invoice,
            items: new_items,
        })
    }

    /// Binds (or unbinds) a product on one line item. On a SENT invoice the
    /// reservation is re-derived from the updated items.
    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn assign_item_product(
        &self,
        ctx: ActorContext,
        invoice_id: Uuid,
        item_id: Uuid,
        product_id: Option<Uuid>,
    ) -> Result<InvoiceWithItems, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;
        let invoice = lock_invoice(&txn, ctx.business_id, invoice_id).await?;
        if !invoice.status.product_binding_editable() {
            return Err(ServiceError::InvalidOperation(format!(
                "items of a {} invoice are frozen",
                invoice.status
            )));
        }

        let item = invoice_item::Entity::find_by_id(item_id)
            .filter(invoice_item::Column::InvoiceId.eq(invoice.id))
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("invoice item", item_id))?;

        if let Some(product_id) = product_id {
            live_product(&txn, ctx.business_id, product_id).await?;
        }

        let mut active: invoice_item::ActiveModel = item.into();
        active.product_id = Set(product_id);
        active.update(&txn).await.map_err(ServiceError::db_error)?;

        let items = load_items(&txn, invoice.id).await?;
        if invoice.status == InvoiceStatus::Sent {
            self.check_stock_policy(&txn, &invoice, &items).await?;
            self.reservations
                .upsert_in(&txn, ctx, &invoice, &items)
                .await?;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(invoice_id = %invoice.id, %item_id, product_id = ?product_id, "Assigned item product");
        Ok(InvoiceWithItems { invoice, items })
    }

    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn get_invoice(
        &self,
        ctx: ActorContext,
        invoice_id: Uuid,
    ) -> Result<InvoiceWithItems, ServiceError> {
        let db = &*self.db_pool;
        let invoice = invoice::Entity::find_by_id(invoice_id)
            .filter(invoice::Column::BusinessId.eq(ctx.business_id))
            .filter(invoice::Column::DeletedAt.is_null())
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("invoice", invoice_id))?;
        let items = load_items(db, invoice.id).await?;
        Ok(InvoiceWithItems { invoice, items })
    }

    /// Moves an invoice to `requested`, applying the side effects of the edge.
    /// Requesting the current status is a successful no-op.
    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn transition(
        &self,
        ctx: ActorContext,
        invoice_id: Uuid,
        requested: InvoiceStatus,
    ) -> Result<TransitionOutcome, ServiceError> {
        let started = Instant::now();
        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;
        let invoice = lock_invoice(&txn, ctx.business_id, invoice_id).await?;
        let from = invoice.status;

        if from == requested {
            let items = load_items(&txn, invoice.id).await?;
            txn.commit().await.map_err(ServiceError::db_error)?;
            return Ok(TransitionOutcome {
                invoice: InvoiceWithItems { invoice, items },
                stock_consumption_entry_id: None,
                changed: false,
            });
        }

        if !from.can_transition_to(requested) {
            warn!(%invoice_id, %from, to = %requested, "Rejected invoice transition");
            counter!("billing.invoice.transitions_rejected", 1);
            return Err(ServiceError::InvalidTransition {
                from,
                to: requested,
            });
        }

        let now = Utc::now();
        let mut stock_consumption_entry_id = None;
        let updated = match requested {
            InvoiceStatus::Sent => self.enter_sent(&txn, ctx, invoice, now).await?,
            InvoiceStatus::Cancelled => {
                if from == InvoiceStatus::Sent {
                    self.reservations.release_in(&txn, invoice.id).await?;
                }
                let mut active: invoice::ActiveModel = invoice.into();
                active.status = Set(InvoiceStatus::Cancelled);
                active.updated_at = Set(now);
                active.update(&txn).await.map_err(ServiceError::db_error)?
            }
            InvoiceStatus::Paid => {
                self.settle_outstanding(&txn, ctx, &invoice, now).await?;
                let (paid, bookings) = self.apply_paid(&txn, ctx, invoice, now).await?;
                stock_consumption_entry_id = bookings.stock_consumption_entry_id;
                paid
            }
            InvoiceStatus::Draft => {
                return Err(ServiceError::InvalidTransition {
                    from,
                    to: requested,
                })
            }
        };

        let items = load_items(&txn, updated.id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("billing.invoice.transitions", 1, "to" => requested.to_string());
        histogram!("billing.invoice.transition.duration", started.elapsed());
        info!(
            %invoice_id,
            %from,
            to = %requested,
            invoice_number = ?updated.invoice_number,
            "Invoice transitioned"
        );

        Ok(TransitionOutcome {
            invoice: InvoiceWithItems {
                invoice: updated,
                items,
            },
            stock_consumption_entry_id,
            changed: true,
        })
    }

    /// First issue assigns the number and `issued_at`; every entry into SENT
    /// re-derives the reservation.
    async fn enter_sent(
        &self,
        txn: &DatabaseTransaction,
        ctx: ActorContext,
        invoice: invoice::Model,
        now: DateTime<Utc>,
    ) -> Result<invoice::Model, ServiceError> {
        let items = load_items(txn, invoice.id).await?;
        self.check_stock_policy(txn, &invoice, &items).await?;

        let issued_at = invoice.issued_at.unwrap_or(now);
        let invoice_number = match invoice.invoice_number.clone() {
            Some(number) => number,
            None => {
                self.numbering
                    .next_invoice_number(txn, ctx.business_id, issued_at)
                    .await?
            }
        };

        let mut active: invoice::ActiveModel = invoice.into();
        active.status = Set(InvoiceStatus::Sent);
        active.invoice_number = Set(Some(invoice_number));
        active.issued_at = Set(Some(issued_at));
        active.updated_at = Set(now);
        let updated = active.update(txn).await.map_err(ServiceError::db_error)?;

        self.reservations
            .upsert_in(txn, ctx, &updated, &items)
            .await?;
        Ok(updated)
    }

    async fn check_stock_policy(
        &self,
        txn: &DatabaseTransaction,
        invoice: &invoice::Model,
        items: &[invoice_item::Model],
    ) -> Result<(), ServiceError> {
        if self.settings.stock_policy != StockPolicy::RejectOversell {
            return Ok(());
        }
        let plan = self
            .reservations
            .plan_for_items(txn, invoice.business_id, items)
            .await?;
        self.inventory
            .ensure_available(txn, &plan, Some(invoice.id))
            .await
    }

    /// A manual SENT -> PAID records whatever is still owed as a settlement
    /// payment, so the paid sum always covers the total.
    async fn settle_outstanding(
        &self,
        txn: &DatabaseTransaction,
        ctx: ActorContext,
        invoice: &invoice::Model,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let paid = payments::sum_paid(txn, invoice.id).await?;
        let remaining = (invoice.total() - paid).non_negative();
        if !remaining.is_positive() {
            return Ok(());
        }

        let settlement = NewPayment {
            invoice_id: invoice.id,
            amount_cents: remaining.cents(),
            paid_at: now,
            method: PaymentMethod::Other,
            reference: None,
            note: Some("Outstanding balance settled on manual status change".to_string()),
            metadata: Some(PaymentMetadata::settlement()),
        };
        let payment = payments::insert_payment(txn, ctx, &settlement).await?;
        info!(
            invoice_id = %invoice.id,
            payment_id = %payment.id,
            amount_cents = payment.amount_cents,
            "Recorded settlement payment"
        );
        Ok(())
    }

    /// PAID entry: status, `paid_at`, stock consumption and bookings.
    pub(crate) async fn apply_paid(
        &self,
        txn: &DatabaseTransaction,
        ctx: ActorContext,
        invoice: invoice::Model,
        paid_at: DateTime<Utc>,
    ) -> Result<(invoice::Model, PaidBookings), ServiceError> {
        let mut active: invoice::ActiveModel = invoice.into();
        active.status = Set(InvoiceStatus::Paid);
        active.paid_at = Set(Some(paid_at));
        active.updated_at = Set(Utc::now());
        let updated = active.update(txn).await.map_err(ServiceError::db_error)?;

        let consumed = self.reservations.consume_in(txn, ctx, &updated).await?;
        let bookings = self
            .accounting
            .record_invoice_paid(txn, ctx, &updated, paid_at, &consumed)
            .await?;
        Ok((updated, bookings))
    }

    /// PAID -> SENT after a reversal leaves a balance.
    pub(crate) async fn apply_unpaid(
        &self,
        txn: &DatabaseTransaction,
        ctx: ActorContext,
        invoice: invoice::Model,
    ) -> Result<invoice::Model, ServiceError> {
        let mut active: invoice::ActiveModel = invoice.into();
        active.status = Set(InvoiceStatus::Sent);
        active.paid_at = Set(None);
        active.updated_at = Set(Utc::now());
        let updated = active.update(txn).await.map_err(ServiceError::db_error)?;

        self.accounting
            .reverse_invoice_paid(txn, ctx, &updated)
            .await?;
        counter!("billing.invoice.transitions", 1, "to" => InvoiceStatus::Sent.to_string());
        Ok(updated)
    }
}

/// Loads the invoice with `SELECT ... FOR UPDATE`, scoped to the business.
pub(crate) async fn lock_invoice(
    txn: &DatabaseTransaction,
    business_id: Uuid,
    invoice_id: Uuid,
) -> Result<invoice::Model, ServiceError> {
    invoice::Entity::find_by_id(invoice_id)
        .filter(invoice::Column::BusinessId.eq(business_id))
        .filter(invoice::Column::DeletedAt.is_null())
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("invoice", invoice_id))
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<Vec<invoice_item::Model>, ServiceError> {
    invoice_item::Entity::find()
        .filter(invoice_item::Column::InvoiceId.eq(invoice_id))
        .order_by_asc(invoice_item::Column::Position)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

fn price_items(items: &[NewInvoiceItem]) -> Result<Vec<Money>, ServiceError> {
    items
        .iter()
        .map(|item| {
            line_total(
                item.quantity,
                Money::from_cents(item.unit_price_cents),
                item.discount.as_ref(),
            )
        })
        .collect()
}

async fn insert_items(
    txn: &DatabaseTransaction,
    invoice_id: Uuid,
    items: &[NewInvoiceItem],
    priced: &[Money],
) -> Result<Vec<invoice_item::Model>, ServiceError> {
    let now = Utc::now();
    let mut created = Vec::with_capacity(items.len());
    for (position, (item, total)) in items.iter().zip(priced).enumerate() {
        let discount = item.discount.as_ref().map(Discount::to_json).transpose()?;
        let model = invoice_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            invoice_id: Set(invoice_id),
            position: Set(position as i32),
            label: Set(item.label.clone()),
            product_id: Set(item.product_id),
            quantity: Set(item.quantity),
            unit_price_cents: Set(item.unit_price_cents),
            discount: Set(discount),
            line_total_cents: Set(total.cents()),
            created_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;
        created.push(model);
    }
    Ok(created)
}

/// Every bound product must be a live product of the business.
async fn check_products(
    txn: &DatabaseTransaction,
    business_id: Uuid,
    items: &[NewInvoiceItem],
) -> Result<(), ServiceError> {
    let ids: Vec<Uuid> = items.iter().filter_map(|item| item.product_id).collect();
    if ids.is_empty() {
        return Ok(());
    }
    let found: HashMap<Uuid, product::Model> = product::Entity::find()
        .filter(product::Column::Id.is_in(ids.clone()))
        .filter(product::Column::BusinessId.eq(business_id))
        .filter(product::Column::DeletedAt.is_null())
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    match ids.into_iter().find(|id| !found.contains_key(id)) {
        Some(missing) => Err(ServiceError::ValidationError(format!(
            "product {} does not belong to this business",
            missing
        ))),
        None => Ok(()),
    }
}

async fn live_product(
    txn: &DatabaseTransaction,
    business_id: Uuid,
    product_id: Uuid,
) -> Result<product::Model, ServiceError> {
    product::Entity::find_by_id(product_id)
        .filter(product::Column::BusinessId.eq(business_id))
        .filter(product::Column::DeletedAt.is_null())
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "product {} does not belong to this business",
                product_id
            ))
        })
}
