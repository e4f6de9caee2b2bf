mod common;

use assert_matches::assert_matches;
use common::{line, new_invoice, TestApp};
use stateset_billing::config::StockPolicy;
use stateset_billing::entities::inventory_movement::MovementType;
use stateset_billing::entities::inventory_reservation::ReservationStatus;
use stateset_billing::entities::invoice::InvoiceStatus;
use stateset_billing::entities::ledger_entry::{LedgerDetails, LedgerSourceType};
use stateset_billing::services::inventory::NewMovement;
use stateset_billing::ServiceError;

#[tokio::test]
async fn send_reserves_and_pay_consumes() {
    let app = TestApp::new().await;
    let p = app.seed_product("hinge", 250).await;
    app.stock_in(p.id, 10).await;
    let project = app.seed_project().await;

    let draft = app
        .services
        .invoices
        .create_invoice(
            app.ctx,
            new_invoice(
                project.id,
                vec![line("Hinges", Some(p.id), 3, 900), line("Labour", None, 1, 5_000)],
            ),
        )
        .await
        .unwrap();
    let id = draft.invoice.id;

    let before = app.services.inventory.stock_level(app.ctx, p.id).await.unwrap();
    assert_eq!((before.on_hand, before.reserved, before.available), (10, 0, 10));

    app.send(id).await;

    let reservation = app
        .services
        .reservations
        .reservation_for_invoice(app.ctx, id)
        .await
        .unwrap()
        .expect("reservation");
    assert_eq!(reservation.reservation.status, ReservationStatus::Active);
    assert_eq!(reservation.items.len(), 1);
    assert_eq!(reservation.quantity_for(p.id), 3);

    let sent = app.services.inventory.stock_level(app.ctx, p.id).await.unwrap();
    assert_eq!((sent.on_hand, sent.reserved, sent.available), (10, 3, 7));

    let outcome = app
        .services
        .invoices
        .transition(app.ctx, id, InvoiceStatus::Paid)
        .await
        .unwrap();
    let consumption_id = outcome
        .stock_consumption_entry_id
        .expect("stock consumption entry");

    let reservation = app
        .services
        .reservations
        .reservation_for_invoice(app.ctx, id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.reservation.status, ReservationStatus::Consumed);

    let paid = app.services.inventory.stock_level(app.ctx, p.id).await.unwrap();
    assert_eq!((paid.on_hand, paid.reserved, paid.available), (7, 0, 7));

    let entries = app
        .services
        .accounting
        .ledger_entries_for_invoice(app.ctx, id)
        .await
        .unwrap();
    let consumption = entries
        .iter()
        .find(|e| e.source_type == LedgerSourceType::StockConsumption)
        .unwrap();
    assert_eq!(consumption.id, consumption_id);
    assert_eq!(consumption.amount_cents, 750);
    assert_matches!(
        consumption.details().unwrap(),
        Some(LedgerDetails::StockConsumption { lines })
            if lines.len() == 1 && lines[0].quantity == 3 && lines[0].product_id == p.id
    );
}

#[tokio::test]
async fn consume_twice_moves_stock_once() {
    let app = TestApp::new().await;
    let p = app.seed_product("panel", 1_000).await;
    app.stock_in(p.id, 5).await;
    let project = app.seed_project().await;
    let draft = app
        .services
        .invoices
        .create_invoice(
            app.ctx,
            new_invoice(project.id, vec![line("Panels", Some(p.id), 2, 3_000)]),
        )
        .await
        .unwrap();
    let id = draft.invoice.id;
    app.send(id).await;
    app.pay(id, 6_000).await.unwrap();

    let again = app
        .services
        .reservations
        .consume_reservation(app.ctx, id)
        .await
        .unwrap();
    assert!(again.is_empty());

    let level = app.services.inventory.stock_level(app.ctx, p.id).await.unwrap();
    assert_eq!(level.on_hand, 3);
}

#[tokio::test]
async fn consume_requires_paid_invoice() {
    let app = TestApp::new().await;
    let sent = app.sent_invoice(1_000).await;

    let err = app
        .services
        .reservations
        .consume_reservation(app.ctx, sent.invoice.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn upsert_twice_leaves_one_active_reservation() {
    let app = TestApp::new().await;
    let p = app.seed_product("rail", 400).await;
    let project = app.seed_project().await;
    let draft = app
        .services
        .invoices
        .create_invoice(
            app.ctx,
            new_invoice(
                project.id,
                vec![line("Rail", Some(p.id), 2, 800), line("Rail", Some(p.id), 1, 800)],
            ),
        )
        .await
        .unwrap();
    let id = draft.invoice.id;
    app.send(id).await;

    let reservations = &app.services.reservations;
    let first = reservations
        .upsert_reservation_from_invoice(app.ctx, id)
        .await
        .unwrap()
        .unwrap();
    let second = reservations
        .upsert_reservation_from_invoice(app.ctx, id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reservations.active_count(app.ctx, id).await.unwrap(), 1);
    assert_eq!(first.quantity_for(p.id), 3);
    assert_eq!(second.quantity_for(p.id), 3);
    assert_eq!(second.items.len(), 1);

    let level = app.services.inventory.stock_level(app.ctx, p.id).await.unwrap();
    assert_eq!(level.reserved, 3);
}

#[tokio::test]
async fn upsert_requires_sent_invoice() {
    let app = TestApp::new().await;
    let draft = app.draft_invoice(1_000).await;

    let err = app
        .services
        .reservations
        .upsert_reservation_from_invoice(app.ctx, draft.invoice.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn assigning_product_on_sent_invoice_reserves_it() {
    let app = TestApp::new().await;
    let p = app.seed_product("tile", 50).await;
    let sent = app.sent_invoice(2_000).await;
    let item_id = sent.items[0].id;

    assert_eq!(
        app.services
            .reservations
            .active_count(app.ctx, sent.invoice.id)
            .await
            .unwrap(),
        0
    );

    let updated = app
        .services
        .invoices
        .assign_item_product(app.ctx, sent.invoice.id, item_id, Some(p.id))
        .await
        .unwrap();
    assert_eq!(updated.items[0].product_id, Some(p.id));

    let reservation = app
        .services
        .reservations
        .reservation_for_invoice(app.ctx, sent.invoice.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.reservation.status, ReservationStatus::Active);
    assert_eq!(reservation.quantity_for(p.id), 1);

    // Unbinding drops the hold again.
    app.services
        .invoices
        .assign_item_product(app.ctx, sent.invoice.id, item_id, None)
        .await
        .unwrap();
    assert_eq!(
        app.services
            .reservations
            .active_count(app.ctx, sent.invoice.id)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn cancelling_sent_invoice_releases_reservation() {
    let app = TestApp::new().await;
    let p = app.seed_product("sink", 12_000).await;
    app.stock_in(p.id, 1).await;
    let project = app.seed_project().await;
    let draft = app
        .services
        .invoices
        .create_invoice(
            app.ctx,
            new_invoice(project.id, vec![line("Sink", Some(p.id), 1, 20_000)]),
        )
        .await
        .unwrap();
    let id = draft.invoice.id;
    app.send(id).await;

    app.services
        .invoices
        .transition(app.ctx, id, InvoiceStatus::Cancelled)
        .await
        .unwrap();

    let reservation = app
        .services
        .reservations
        .reservation_for_invoice(app.ctx, id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.reservation.status, ReservationStatus::Released);

    let level = app.services.inventory.stock_level(app.ctx, p.id).await.unwrap();
    assert_eq!((level.on_hand, level.available), (1, 1));

    // Releasing again is a no-op.
    assert!(!app
        .services
        .reservations
        .release_reservation(app.ctx, id)
        .await
        .unwrap());
}

#[tokio::test]
async fn unstocked_products_are_not_reserved() {
    let app = TestApp::new().await;
    let service = app
        .seed_product_for(app.ctx, "consulting", 0, false)
        .await;
    let project = app.seed_project().await;
    let draft = app
        .services
        .invoices
        .create_invoice(
            app.ctx,
            new_invoice(project.id, vec![line("Consulting", Some(service.id), 4, 15_000)]),
        )
        .await
        .unwrap();
    app.send(draft.invoice.id).await;

    assert!(app
        .services
        .reservations
        .reservation_for_invoice(app.ctx, draft.invoice.id)
        .await
        .unwrap()
        .is_none());

    let outcome = app
        .services
        .invoices
        .transition(app.ctx, draft.invoice.id, InvoiceStatus::Paid)
        .await
        .unwrap();
    assert!(outcome.stock_consumption_entry_id.is_none());
}

#[tokio::test]
async fn oversell_is_allowed_by_default() {
    let app = TestApp::new().await;
    let p = app.seed_product("beam", 3_000).await;
    app.stock_in(p.id, 1).await;
    let project = app.seed_project().await;
    let draft = app
        .services
        .invoices
        .create_invoice(
            app.ctx,
            new_invoice(project.id, vec![line("Beams", Some(p.id), 4, 5_000)]),
        )
        .await
        .unwrap();
    app.send(draft.invoice.id).await;

    let level = app.services.inventory.stock_level(app.ctx, p.id).await.unwrap();
    assert_eq!(level.available, -3);
}

#[tokio::test]
async fn reject_oversell_policy_blocks_issue() {
    let app = TestApp::with_policy(StockPolicy::RejectOversell).await;
    let p = app.seed_product("beam", 3_000).await;
    app.stock_in(p.id, 1).await;
    let project = app.seed_project().await;
    let draft = app
        .services
        .invoices
        .create_invoice(
            app.ctx,
            new_invoice(project.id, vec![line("Beams", Some(p.id), 4, 5_000)]),
        )
        .await
        .unwrap();

    let err = app
        .services
        .invoices
        .transition(app.ctx, draft.invoice.id, InvoiceStatus::Sent)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    let still_draft = app
        .services
        .invoices
        .get_invoice(app.ctx, draft.invoice.id)
        .await
        .unwrap();
    assert_eq!(still_draft.invoice.status, InvoiceStatus::Draft);
    assert!(still_draft.invoice.invoice_number.is_none());
}

#[tokio::test]
async fn oversized_reservation_is_rejected_without_issuing() {
    let app = TestApp::new().await;
    let p = app.seed_product("rivet", 0).await;
    let project = app.seed_project().await;
    let draft = app
        .services
        .invoices
        .create_invoice(
            app.ctx,
            new_invoice(
                project.id,
                vec![
                    line("Rivets", Some(p.id), i64::MAX, 0),
                    line("More rivets", Some(p.id), i64::MAX, 0),
                ],
            ),
        )
        .await
        .unwrap();

    let err = app
        .services
        .invoices
        .transition(app.ctx, draft.invoice.id, InvoiceStatus::Sent)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let still_draft = app
        .services
        .invoices
        .get_invoice(app.ctx, draft.invoice.id)
        .await
        .unwrap();
    assert_eq!(still_draft.invoice.status, InvoiceStatus::Draft);
    assert!(still_draft.invoice.invoice_number.is_none());
    assert!(app
        .services
        .reservations
        .reservation_for_invoice(app.ctx, draft.invoice.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn reversal_does_not_return_consumed_stock() {
    let app = TestApp::new().await;
    let p = app.seed_product("valve", 700).await;
    app.stock_in(p.id, 4).await;
    let project = app.seed_project().await;
    let draft = app
        .services
        .invoices
        .create_invoice(
            app.ctx,
            new_invoice(project.id, vec![line("Valves", Some(p.id), 2, 1_500)]),
        )
        .await
        .unwrap();
    let id = draft.invoice.id;
    app.send(id).await;
    let paid = app.pay(id, 3_000).await.unwrap();

    app.services
        .payments
        .reverse_payment(app.ctx, paid.payment.id)
        .await
        .unwrap();

    let level = app.services.inventory.stock_level(app.ctx, p.id).await.unwrap();
    assert_eq!(level.on_hand, 2);

    let entries = app
        .services
        .accounting
        .ledger_entries_for_invoice(app.ctx, id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].source_type, LedgerSourceType::StockConsumption);
}

#[tokio::test]
async fn manual_movements_follow_sign_rules() {
    let app = TestApp::new().await;
    let p = app.seed_product("screw", 5).await;
    let inventory = &app.services.inventory;

    let out = inventory
        .record_movement(
            app.ctx,
            NewMovement {
                product_id: p.id,
                movement_type: MovementType::Out,
                quantity: 2,
                note: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(out.quantity, -2);

    let adjust = inventory
        .record_movement(
            app.ctx,
            NewMovement {
                product_id: p.id,
                movement_type: MovementType::Adjust,
                quantity: 7,
                note: Some("count".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(adjust.quantity, 7);

    let err = inventory
        .record_movement(
            app.ctx,
            NewMovement {
                product_id: p.id,
                movement_type: MovementType::Adjust,
                quantity: 0,
                note: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = inventory
        .record_movement(
            app.other_business(),
            NewMovement {
                product_id: p.id,
                movement_type: MovementType::In,
                quantity: 1,
                note: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    assert_eq!(inventory.stock_level(app.ctx, p.id).await.unwrap().on_hand, 5);
}
