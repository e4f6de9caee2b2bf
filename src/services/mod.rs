use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::DbPool;

// Leaf services
pub mod inventory;
pub mod numbering;

// Stock holds against open invoices
pub mod inventory_reservation_service;

// Financial services
pub mod accounting;
pub mod invoicing;
pub mod payments;

/// Caller identity, already authenticated and authorized for `business_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub business_id: Uuid,
    pub actor_id: Uuid,
}

impl ActorContext {
    pub fn new(business_id: Uuid, actor_id: Uuid) -> Self {
        Self {
            business_id,
            actor_id,
        }
    }
}

/// Wired set of billing services sharing one pool.
#[derive(Clone)]
pub struct BillingServices {
    pub inventory: Arc<inventory::InventoryService>,
    pub reservations: Arc<inventory_reservation_service::InventoryReservationService>,
    pub accounting: Arc<accounting::AccountingService>,
    pub invoices: Arc<invoicing::InvoiceService>,
    pub payments: Arc<payments::PaymentService>,
}

impl BillingServices {
    pub fn new(db_pool: Arc<DbPool>, config: &AppConfig) -> Self {
        let numbering: Arc<dyn numbering::DocumentNumbering> = Arc::new(
            numbering::SequentialNumbering::new(config.invoice_number_prefix.clone()),
        );
        Self::with_numbering(db_pool, config, numbering)
    }

    /// Same as [`BillingServices::new`] with a caller-supplied numbering service.
    pub fn with_numbering(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        numbering: Arc<dyn numbering::DocumentNumbering>,
    ) -> Self {
        let inventory = Arc::new(inventory::InventoryService::new(db_pool.clone()));
        let reservations = Arc::new(
            inventory_reservation_service::InventoryReservationService::new(db_pool.clone()),
        );
        let accounting = Arc::new(accounting::AccountingService::new(db_pool.clone()));
        let invoices = Arc::new(invoicing::InvoiceService::new(
            db_pool.clone(),
            invoicing::InvoiceSettings::from(config),
            inventory.clone(),
            reservations.clone(),
            accounting.clone(),
            numbering,
        ));
        let payments = Arc::new(payments::PaymentService::new(db_pool, invoices.clone()));

        Self {
            inventory,
            reservations,
            accounting,
            invoices,
            payments,
        }
    }
}
