pub mod document_sequence;
pub mod finance;
pub mod inventory_movement;
pub mod inventory_reservation;
pub mod inventory_reservation_item;
pub mod invoice;
pub mod invoice_item;
pub mod ledger_entry;
pub mod payment;
pub mod product;
pub mod project;
