#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use stateset_billing::{
    config::{AppConfig, StockPolicy},
    db::{self, DbConfig, DbPool},
    entities::{
        inventory_movement::MovementType,
        invoice::InvoiceStatus,
        payment::PaymentMethod,
        product, project,
    },
    services::{
        inventory::NewMovement,
        invoicing::{InvoiceWithItems, NewInvoice, NewInvoiceItem},
        payments::{NewPayment, PaymentOutcome},
    },
    ActorContext, BillingServices, ServiceError,
};
use uuid::Uuid;

/// Billing services over a private in-memory SQLite database.
///
/// The pool holds exactly one connection: every `sqlite::memory:` connection
/// is its own database, and one connection also serializes concurrent
/// transactions the way row locks do on Postgres.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub services: BillingServices,
    pub ctx: ActorContext,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_policy(StockPolicy::AllowOversell).await
    }

    pub async fn with_policy(stock_policy: StockPolicy) -> Self {
        let pool = db::establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(3600),
            acquire_timeout: Duration::from_secs(30),
            sqlx_logging: false,
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool).await.expect("migrations");

        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.stock_policy = stock_policy;

        let db = Arc::new(pool);
        let services = BillingServices::new(db.clone(), &cfg);
        Self {
            db,
            services,
            ctx: ActorContext::new(Uuid::new_v4(), Uuid::new_v4()),
        }
    }

    /// Context of another tenant sharing the same database.
    pub fn other_business(&self) -> ActorContext {
        ActorContext::new(Uuid::new_v4(), Uuid::new_v4())
    }

    pub async fn seed_project(&self) -> project::Model {
        self.seed_project_for(self.ctx).await
    }

    pub async fn seed_project_for(&self, ctx: ActorContext) -> project::Model {
        project::ActiveModel {
            id: Set(Uuid::new_v4()),
            business_id: Set(ctx.business_id),
            name: Set("Kitchen remodel".to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed project")
    }

    pub async fn seed_product(&self, name: &str, unit_cost_cents: i64) -> product::Model {
        self.seed_product_for(self.ctx, name, unit_cost_cents, true)
            .await
    }

    pub async fn seed_product_for(
        &self,
        ctx: ActorContext,
        name: &str,
        unit_cost_cents: i64,
        is_stocked: bool,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            business_id: Set(ctx.business_id),
            name: Set(name.to_string()),
            sku: Set(Some(format!("SKU-{}", name.to_uppercase()))),
            is_stocked: Set(is_stocked),
            unit_cost_cents: Set(unit_cost_cents),
            created_at: Set(Utc::now()),
            deleted_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed product")
    }

    pub async fn stock_in(&self, product_id: Uuid, quantity: i64) {
        self.services
            .inventory
            .record_movement(
                self.ctx,
                NewMovement {
                    product_id,
                    movement_type: MovementType::In,
                    quantity,
                    note: Some("opening stock".to_string()),
                },
            )
            .await
            .expect("stock in");
    }

    /// DRAFT invoice with one unbound line of `total_cents`.
    pub async fn draft_invoice(&self, total_cents: i64) -> InvoiceWithItems {
        let project = self.seed_project().await;
        self.services
            .invoices
            .create_invoice(self.ctx, new_invoice(project.id, vec![line("Services", None, 1, total_cents)]))
            .await
            .expect("create invoice")
    }

    /// SENT invoice with one unbound line of `total_cents`.
    pub async fn sent_invoice(&self, total_cents: i64) -> InvoiceWithItems {
        let draft = self.draft_invoice(total_cents).await;
        self.send(draft.invoice.id).await
    }

    pub async fn send(&self, invoice_id: Uuid) -> InvoiceWithItems {
        self.services
            .invoices
            .transition(self.ctx, invoice_id, InvoiceStatus::Sent)
            .await
            .expect("send invoice")
            .invoice
    }

    pub async fn pay(&self, invoice_id: Uuid, amount_cents: i64) -> Result<PaymentOutcome, ServiceError> {
        self.services
            .payments
            .record_payment(self.ctx, payment(invoice_id, amount_cents))
            .await
    }
}

pub fn line(
    label: &str,
    product_id: Option<Uuid>,
    quantity: i64,
    unit_price_cents: i64,
) -> NewInvoiceItem {
    NewInvoiceItem {
        label: label.to_string(),
        product_id,
        quantity,
        unit_price_cents,
        discount: None,
    }
}

pub fn new_invoice(project_id: Uuid, items: Vec<NewInvoiceItem>) -> NewInvoice {
    NewInvoice {
        project_id,
        client_id: None,
        quote_id: None,
        currency: None,
        deposit_percent: 0,
        due_at: None,
        items,
    }
}

pub fn payment(invoice_id: Uuid, amount_cents: i64) -> NewPayment {
    NewPayment {
        invoice_id,
        amount_cents,
        paid_at: Utc::now(),
        method: PaymentMethod::Wire,
        reference: None,
        note: None,
        metadata: None,
    }
}
