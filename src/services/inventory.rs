//! Inventory ledger: append-only stock movements, on-hand derived by summation.

use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, JoinType, QueryFilter,
    QuerySelect, RelationTrait, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::inventory_movement::{self, MovementType};
use crate::entities::inventory_reservation::{self, ReservationStatus};
use crate::entities::{inventory_reservation_item, product};
use crate::errors::ServiceError;
use crate::services::ActorContext;

/// Request to record a stock movement. `quantity` is the magnitude for IN and
/// OUT and the signed delta for ADJUST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMovement {
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub on_hand: i64,
    /// Held by ACTIVE reservations across all invoices.
    pub reserved: i64,
    /// `on_hand - reserved`; negative when oversold.
    pub available: i64,
}

/// Signed on-hand delta for a movement request.
pub fn signed_delta(movement_type: MovementType, quantity: i64) -> Result<i64, ServiceError> {
    match movement_type {
        MovementType::In if quantity > 0 => Ok(quantity),
        MovementType::Out if quantity > 0 => Ok(-quantity),
        MovementType::Adjust if quantity != 0 => Ok(quantity),
        MovementType::Adjust => Err(ServiceError::ValidationError(
            "adjustment quantity must not be zero".to_string(),
        )),
        _ => Err(ServiceError::ValidationError(format!(
            "{} quantity must be positive",
            movement_type
        ))),
    }
}

fn quantity_overflow() -> ServiceError {
    ServiceError::ValidationError("quantity overflow".to_string())
}

/// `on_hand - reserved`, failing instead of wrapping.
pub fn available_quantity(on_hand: i64, reserved: i64) -> Result<i64, ServiceError> {
    on_hand.checked_sub(reserved).ok_or_else(quantity_overflow)
}

/// Adds `quantity` to the running total for `product_id`.
pub(crate) fn add_to_plan(
    plan: &mut BTreeMap<Uuid, i64>,
    product_id: Uuid,
    quantity: i64,
) -> Result<(), ServiceError> {
    let total = plan.entry(product_id).or_insert(0);
    *total = total.checked_add(quantity).ok_or_else(quantity_overflow)?;
    Ok(())
}

#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Records a manual IN/OUT/ADJUST movement for a stocked product.
    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn record_movement(
        &self,
        ctx: ActorContext,
        movement: NewMovement,
    ) -> Result<inventory_movement::Model, ServiceError> {
        let delta = signed_delta(movement.movement_type, movement.quantity)?;
        let db = &*self.db_pool;

        let product = scoped_product(db, ctx.business_id, movement.product_id)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "product {} does not belong to this business",
                    movement.product_id
                ))
            })?;
        if !product.is_stocked {
            return Err(ServiceError::ValidationError(format!(
                "product {} is not stocked",
                product.id
            )));
        }

        let created = insert_movement(
            db,
            ctx,
            product.id,
            movement.movement_type,
            delta,
            None,
            movement.note,
        )
        .await?;

        info!(
            movement_id = %created.id,
            product_id = %created.product_id,
            movement_type = %created.movement_type,
            quantity = created.quantity,
            "Recorded inventory movement"
        );
        Ok(created)
    }

    /// On-hand, reserved and available quantity of a product.
    #[instrument(skip(self), fields(business_id = %ctx.business_id))]
    pub async fn stock_level(
        &self,
        ctx: ActorContext,
        product_id: Uuid,
    ) -> Result<StockLevel, ServiceError> {
        let db = &*self.db_pool;
        scoped_product(db, ctx.business_id, product_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("product", product_id))?;

        let on_hand = on_hand(db, product_id).await?;
        let reserved = reserved(db, product_id, None).await?;
        Ok(StockLevel {
            product_id,
            on_hand,
            reserved,
            available: available_quantity(on_hand, reserved)?,
        })
    }

    /// Fails with `InsufficientStock` if any requested quantity exceeds what is
    /// available, ignoring holds owned by `excluding_invoice`.
    pub async fn ensure_available<C: ConnectionTrait>(
        &self,
        conn: &C,
        requested: &BTreeMap<Uuid, i64>,
        excluding_invoice: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        for (&product_id, &quantity) in requested {
            let available = available_quantity(
                on_hand(conn, product_id).await?,
                reserved(conn, product_id, excluding_invoice).await?,
            )?;
            if available < quantity {
                warn!(%product_id, available, requested = quantity, "Rejected oversell");
                counter!("billing.inventory.oversell_rejected", 1);
                return Err(ServiceError::InsufficientStock(format!(
                    "product {} has {} available, {} requested",
                    product_id, available, quantity
                )));
            }
        }
        Ok(())
    }
}

/// Product owned by `business_id`, including soft-deleted rows.
pub(crate) async fn scoped_product<C: ConnectionTrait>(
    conn: &C,
    business_id: Uuid,
    product_id: Uuid,
) -> Result<Option<product::Model>, ServiceError> {
    product::Entity::find_by_id(product_id)
        .filter(product::Column::BusinessId.eq(business_id))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

pub(crate) async fn insert_movement<C: ConnectionTrait>(
    conn: &C,
    ctx: ActorContext,
    product_id: Uuid,
    movement_type: MovementType,
    delta: i64,
    invoice_id: Option<Uuid>,
    note: Option<String>,
) -> Result<inventory_movement::Model, ServiceError> {
    let movement = inventory_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        business_id: Set(ctx.business_id),
        product_id: Set(product_id),
        movement_type: Set(movement_type),
        quantity: Set(delta),
        invoice_id: Set(invoice_id),
        note: Set(note),
        created_by: Set(ctx.actor_id),
        created_at: Set(Utc::now()),
    };
    let created = movement.insert(conn).await.map_err(ServiceError::db_error)?;
    counter!("billing.inventory.movements", 1, "type" => movement_type.to_string());
    Ok(created)
}

/// Sum of all signed movement quantities.
pub(crate) async fn on_hand<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<i64, ServiceError> {
    let total = inventory_movement::Entity::find()
        .select_only()
        .column_as(
            Expr::cust("CAST(COALESCE(SUM(inventory_movements.quantity), 0) AS BIGINT)"),
            "on_hand",
        )
        .filter(inventory_movement::Column::ProductId.eq(product_id))
        .into_tuple::<i64>()
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(total.unwrap_or(0))
}

/// Quantity held by ACTIVE reservations.
pub(crate) async fn reserved<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    excluding_invoice: Option<Uuid>,
) -> Result<i64, ServiceError> {
    let mut query = inventory_reservation_item::Entity::find()
        .select_only()
        .column_as(
            Expr::cust("CAST(COALESCE(SUM(inventory_reservation_items.quantity), 0) AS BIGINT)"),
            "reserved",
        )
        .join(
            JoinType::InnerJoin,
            inventory_reservation_item::Relation::Reservation.def(),
        )
        .filter(inventory_reservation_item::Column::ProductId.eq(product_id))
        .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Active));

    if let Some(invoice_id) = excluding_invoice {
        query = query.filter(inventory_reservation::Column::InvoiceId.ne(invoice_id));
    }

    let total = query
        .into_tuple::<i64>()
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(total.unwrap_or(0))
}
