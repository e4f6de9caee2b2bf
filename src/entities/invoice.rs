use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Invoice lifecycle status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    #[sea_orm(string_value = "DRAFT")]
    Draft,
    #[sea_orm(string_value = "SENT")]
    Sent,
    #[sea_orm(string_value = "PAID")]
    Paid,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl InvoiceStatus {
    /// Legal targets from this status. PAID and CANCELLED are terminal.
    pub fn allowed_targets(self) -> &'static [InvoiceStatus] {
        match self {
            InvoiceStatus::Draft => &[InvoiceStatus::Sent, InvoiceStatus::Cancelled],
            InvoiceStatus::Sent => &[InvoiceStatus::Paid, InvoiceStatus::Cancelled],
            InvoiceStatus::Paid | InvoiceStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: InvoiceStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Line items may be rewritten only before the invoice is issued.
    pub fn items_editable(self) -> bool {
        self == InvoiceStatus::Draft
    }

    /// Product bindings may still change while the invoice is open.
    pub fn product_binding_editable(self) -> bool {
        matches!(self, InvoiceStatus::Draft | InvoiceStatus::Sent)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub business_id: Uuid,
    pub project_id: Uuid,
    pub client_id: Option<Uuid>,
    pub quote_id: Option<Uuid>,
    /// Assigned on first entry into SENT.
    pub invoice_number: Option<String>,
    pub status: InvoiceStatus,
    pub currency: String,
    pub deposit_percent: i32,
    pub total_cents: i64,
    pub deposit_cents: i64,
    pub balance_cents: i64,
    pub issued_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    /// Set iff status is PAID.
    pub paid_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id"
    )]
    Project,
    #[sea_orm(has_many = "super::invoice_item::Entity")]
    Items,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
    #[sea_orm(has_many = "super::inventory_reservation::Entity")]
    Reservations,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::invoice_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl Related<super::inventory_reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    pub fn deposit(&self) -> Money {
        Money::from_cents(self.deposit_cents)
    }

    pub fn balance(&self) -> Money {
        Money::from_cents(self.balance_cents)
    }
}

#[cfg(test)]
mod tests {
    use super::InvoiceStatus::{self, *};
    use rstest::rstest;

    #[rstest]
    #[case(Draft, Sent, true)]
    #[case(Draft, Cancelled, true)]
    #[case(Draft, Paid, false)]
    #[case(Sent, Paid, true)]
    #[case(Sent, Cancelled, true)]
    #[case(Sent, Draft, false)]
    #[case(Paid, Sent, false)]
    #[case(Paid, Cancelled, false)]
    #[case(Paid, Draft, false)]
    #[case(Cancelled, Draft, false)]
    #[case(Cancelled, Sent, false)]
    #[case(Cancelled, Paid, false)]
    fn transition_table(
        #[case] from: InvoiceStatus,
        #[case] to: InvoiceStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn terminal_states() {
        assert!(Paid.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Draft.is_terminal());
        assert!(!Sent.is_terminal());
    }

    #[test]
    fn status_renders_as_stored() {
        assert_eq!(Cancelled.to_string(), "CANCELLED");
        assert_eq!(serde_json::to_string(&Sent).unwrap(), "\"SENT\"");
    }
}
