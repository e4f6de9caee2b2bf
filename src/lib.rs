//! StateSet Billing
//!
//! Reconciliation core for invoicing: the invoice state machine, a payment
//! accrual ledger that cannot overpay, inventory reservations held against
//! issued invoices, and idempotent ledger/income bookings on payment.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod migrator;
pub mod money;
pub mod services;

pub use config::{AppConfig, StockPolicy};
pub use errors::ServiceError;
pub use money::Money;
pub use services::{ActorContext, BillingServices};

use std::sync::Arc;

/// Connects with the configured pool settings, migrates when
/// `auto_migrate` is set, and wires the services.
pub async fn bootstrap(config: &AppConfig) -> Result<BillingServices, ServiceError> {
    let pool = db::establish_connection_from_app_config(config).await?;
    db::check_connection(&pool).await?;
    if config.auto_migrate {
        db::run_migrations(&pool).await?;
    }
    Ok(BillingServices::new(Arc::new(pool), config))
}
