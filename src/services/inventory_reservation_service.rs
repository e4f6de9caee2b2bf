//! Inventory Reservation Service
//!
//! Holds stock against open invoices. A reservation is created or replaced
//! when an invoice is issued, released when it is cancelled, and consumed
//! into OUT movements exactly once when it is paid.
//!
//! The `*_in` methods run inside the caller's transaction, which must already
//! hold the invoice row lock. The standalone methods take the lock themselves.

use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::inventory_movement::MovementType;
use crate::entities::inventory_reservation::{self, ReservationStatus};
use crate::entities::invoice::{self, InvoiceStatus};
use crate::entities::{inventory_reservation_item, invoice_item, product};
use crate::errors::ServiceError;
use crate::services::inventory::{add_to_plan, insert_movement};
use crate::services::invoicing::{load_items, lock_invoice};
use crate::services::ActorContext;

/// A reservation with its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationWithItems {
    pub reservation: inventory_reservation::Model,
    pub items: Vec<inventory_reservation_item::Model>,
}

impl ReservationWithItems {
    pub fn quantity_for(&self, product_id: Uuid) -> i64 {
        self.items
            .iter()
            .filter(|item| item.product_id == product_id)
            .map(|item| item.quantity)
            .sum()
    }
}

/// One product line turned into an OUT movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedItem {
    pub product_id: Uuid,
    pub quantity: i64,
    pub movement_id: Uuid,
    pub unit_cost_cents: i64,
}

/// Service for managing inventory reservations.
#[derive(Clone)]
pub struct InventoryReservationService {
    db_pool: Arc<DbPool>,
}

impl InventoryReservationService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Quantity to reserve per stocked product bound to `items`.
    ///
    /// A bound product that is not owned by the business is a validation
    /// error; deleted or unstocked products are skipped.
    pub async fn plan_for_items(
        &self,
        txn: &DatabaseTransaction,
        business_id: Uuid,
        items: &[invoice_item::Model],
    ) -> Result<BTreeMap<Uuid, i64>, ServiceError> {
        let product_ids: Vec<Uuid> = items.iter().filter_map(|item| item.product_id).collect();
        if product_ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids.clone()))
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut plan = BTreeMap::new();
        for item in items {
            let Some(product_id) = item.product_id else {
                continue;
            };
            let product = products
                .get(&product_id)
                .filter(|p| p.business_id == business_id)
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "product {} on item '{}' does not belong to this business",
                        product_id, item.label
                    ))
                })?;
            if !product.is_reservable_for(business_id) {
                continue;
            }
            add_to_plan(&mut plan, product_id, item.quantity)?;
        }
        Ok(plan)
    }

    /// Replaces the invoice's ACTIVE reservation with one matching `items`.
    ///
    /// Old reservation items are discarded, not merged. Returns `None` when no
    /// item is bound to a stocked product.
    pub async fn upsert_in(
        &self,
        txn: &DatabaseTransaction,
        ctx: ActorContext,
        invoice: &invoice::Model,
        items: &[invoice_item::Model],
    ) -> Result<Option<ReservationWithItems>, ServiceError> {
        let plan = self.plan_for_items(txn, ctx.business_id, items).await?;

        if let Some(existing) = active_reservation(txn, invoice.id).await? {
            inventory_reservation_item::Entity::delete_many()
                .filter(inventory_reservation_item::Column::ReservationId.eq(existing.id))
                .exec(txn)
                .await
                .map_err(ServiceError::db_error)?;
            inventory_reservation::Entity::delete_by_id(existing.id)
                .exec(txn)
                .await
                .map_err(ServiceError::db_error)?;
        }

        if plan.is_empty() {
            return Ok(None);
        }

        let now = Utc::now();
        let reservation = inventory_reservation::ActiveModel {
            id: Set(Uuid::new_v4()),
            business_id: Set(ctx.business_id),
            invoice_id: Set(invoice.id),
            status: Set(ReservationStatus::Active),
            created_by: Set(ctx.actor_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        let mut reserved_items = Vec::with_capacity(plan.len());
        for (product_id, quantity) in plan {
            let item = inventory_reservation_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                reservation_id: Set(reservation.id),
                product_id: Set(product_id),
                quantity: Set(quantity),
            }
            .insert(txn)
            .await
            .map_err(ServiceError::db_error)?;
            reserved_items.push(item);
        }

        counter!("billing.reservations.upserted", 1);
        info!(
            invoice_id = %invoice.id,
            reservation_id = %reservation.id,
            products = reserved_items.len(),
            "Upserted inventory reservation"
        );

        Ok(Some(ReservationWithItems {
            reservation,
            items: reserved_items,
        }))
    }

    /// Marks the ACTIVE reservation RELEASED. Returns whether one was released.
    pub async fn release_in(
        &self,
        txn: &DatabaseTransaction,
        invoice_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let result = inventory_reservation::Entity::update_many()
            .col_expr(
                inventory_reservation::Column::Status,
                Expr::value(ReservationStatus::Released),
            )
            .col_expr(inventory_reservation::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(inventory_reservation::Column::InvoiceId.eq(invoice_id))
            .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Active))
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;

        let released = result.rows_affected > 0;
        if released {
            counter!("billing.reservations.released", 1);
            info!(%invoice_id, "Released inventory reservation");
        }
        Ok(released)
    }

    /// Converts the ACTIVE reservation into OUT movements and marks it
    /// CONSUMED. Returns an empty list when there is nothing ACTIVE, so a
    /// second call never consumes twice.
    pub async fn consume_in(
        &self,
        txn: &DatabaseTransaction,
        ctx: ActorContext,
        invoice: &invoice::Model,
    ) -> Result<Vec<ConsumedItem>, ServiceError> {
        let Some(reservation) = active_reservation(txn, invoice.id).await? else {
            return Ok(Vec::new());
        };

        // Guarded flip: only the caller that moves ACTIVE -> CONSUMED proceeds.
        let flipped = inventory_reservation::Entity::update_many()
            .col_expr(
                inventory_reservation::Column::Status,
                Expr::value(ReservationStatus::Consumed),
            )
            .col_expr(inventory_reservation::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(inventory_reservation::Column::Id.eq(reservation.id))
            .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Active))
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;
        if flipped.rows_affected == 0 {
            return Ok(Vec::new());
        }

        let items = inventory_reservation_item::Entity::find()
            .filter(inventory_reservation_item::Column::ReservationId.eq(reservation.id))
            .order_by_asc(inventory_reservation_item::Column::ProductId)
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?;

        let mut consumed = Vec::with_capacity(items.len());
        for item in items {
            let product = product::Entity::find_by_id(item.product_id)
                .one(txn)
                .await
                .map_err(ServiceError::db_error)?;
            let Some(product) = product.filter(|p| p.is_reservable_for(ctx.business_id)) else {
                warn!(
                    invoice_id = %invoice.id,
                    product_id = %item.product_id,
                    "Skipping consumption of product that is no longer stocked"
                );
                continue;
            };

            let movement = insert_movement(
                txn,
                ctx,
                product.id,
                MovementType::Out,
                -item.quantity,
                Some(invoice.id),
                invoice
                    .invoice_number
                    .as_ref()
                    .map(|number| format!("Invoice {}", number)),
            )
            .await?;

            consumed.push(ConsumedItem {
                product_id: product.id,
                quantity: item.quantity,
                movement_id: movement.id,
                unit_cost_cents: product.unit_cost_cents,
            });
        }

        counter!("billing.reservations.consumed", 1);
        info!(
            invoice_id = %invoice.id,
            reservation_id = %reservation.id,
            lines = consumed.len(),
            "Consumed inventory reservation"
        );
        Ok(consumed)
    }

    /// Re-derives the reservation of a SENT invoice from its current items.
    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn upsert_reservation_from_invoice(
        &self,
        ctx: ActorContext,
        invoice_id: Uuid,
    ) -> Result<Option<ReservationWithItems>, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;
        let invoice = lock_invoice(&txn, ctx.business_id, invoice_id).await?;
        if invoice.status != InvoiceStatus::Sent {
            return Err(ServiceError::InvalidOperation(format!(
                "reservations follow SENT invoices; invoice {} is {}",
                invoice.id, invoice.status
            )));
        }
        let items = load_items(&txn, invoice.id).await?;
        let reservation = self.upsert_in(&txn, ctx, &invoice, &items).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(reservation)
    }

    /// Releases the invoice's ACTIVE reservation. Idempotent.
    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn release_reservation(
        &self,
        ctx: ActorContext,
        invoice_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;
        lock_invoice(&txn, ctx.business_id, invoice_id).await?;
        let released = self.release_in(&txn, invoice_id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(released)
    }

    /// Consumes the reservation of a PAID invoice. Payment already consumes it,
    /// so this normally returns an empty list.
    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn consume_reservation(
        &self,
        ctx: ActorContext,
        invoice_id: Uuid,
    ) -> Result<Vec<ConsumedItem>, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;
        let invoice = lock_invoice(&txn, ctx.business_id, invoice_id).await?;
        if invoice.status != InvoiceStatus::Paid {
            return Err(ServiceError::InvalidOperation(format!(
                "only PAID invoices consume stock; invoice {} is {}",
                invoice.id, invoice.status
            )));
        }
        let consumed = self.consume_in(&txn, ctx, &invoice).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(consumed)
    }

    /// Latest reservation of the invoice in any status.
    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn reservation_for_invoice(
        &self,
        ctx: ActorContext,
        invoice_id: Uuid,
    ) -> Result<Option<ReservationWithItems>, ServiceError> {
        let db = &*self.db_pool;
        let reservation = inventory_reservation::Entity::find()
            .filter(inventory_reservation::Column::BusinessId.eq(ctx.business_id))
            .filter(inventory_reservation::Column::InvoiceId.eq(invoice_id))
            .order_by_desc(inventory_reservation::Column::CreatedAt)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;

        let Some(reservation) = reservation else {
            return Ok(None);
        };
        let items = inventory_reservation_item::Entity::find()
            .filter(inventory_reservation_item::Column::ReservationId.eq(reservation.id))
            .order_by_asc(inventory_reservation_item::Column::ProductId)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(Some(ReservationWithItems { reservation, items }))
    }

    /// Number of ACTIVE reservations for an invoice. At most one.
    pub async fn active_count(
        &self,
        ctx: ActorContext,
        invoice_id: Uuid,
    ) -> Result<u64, ServiceError> {
        use sea_orm::PaginatorTrait;

        inventory_reservation::Entity::find()
            .filter(inventory_reservation::Column::BusinessId.eq(ctx.business_id))
            .filter(inventory_reservation::Column::InvoiceId.eq(invoice_id))
            .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Active))
            .count(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}

async fn active_reservation(
    txn: &DatabaseTransaction,
    invoice_id: Uuid,
) -> Result<Option<inventory_reservation::Model>, ServiceError> {
    inventory_reservation::Entity::find()
        .filter(inventory_reservation::Column::InvoiceId.eq(invoice_id))
        .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Active))
        .one(txn)
        .await
        .map_err(ServiceError::db_error)
}
