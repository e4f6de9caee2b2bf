mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::{payment, TestApp};
use futures::future::join_all;
use stateset_billing::entities::invoice::InvoiceStatus;
use stateset_billing::entities::ledger_entry::LedgerSourceType;
use stateset_billing::entities::payment::PaymentMetadata;
use stateset_billing::{Money, ServiceError};
use uuid::Uuid;

#[tokio::test]
async fn partial_then_full_payment_promotes_invoice() {
    let app = TestApp::new().await;
    let sent = app.sent_invoice(10_000).await;
    let id = sent.invoice.id;

    let first = app.pay(id, 6_000).await.unwrap();
    assert_eq!(first.payment.amount(), Money::from_cents(6_000));
    assert!(!first.promoted);
    assert_eq!(first.remaining_cents, 4_000);
    assert_eq!(first.invoice.status, InvoiceStatus::Sent);

    let second = app.pay(id, 4_000).await.unwrap();
    assert!(second.promoted);
    assert_eq!(second.remaining_cents, 0);
    assert_eq!(second.invoice.status, InvoiceStatus::Paid);
    assert!(second.invoice.paid_at.is_some());

    let entries = app
        .services
        .accounting
        .ledger_entries_for_invoice(app.ctx, id)
        .await
        .unwrap();
    let cash_sales: Vec<_> = entries
        .iter()
        .filter(|e| e.source_type == LedgerSourceType::CashSale)
        .collect();
    assert_eq!(cash_sales.len(), 1);
    assert_eq!(cash_sales[0].amount_cents, 10_000);

    let finances = app
        .services
        .accounting
        .finance_records_for_invoice(app.ctx, id, false)
        .await
        .unwrap();
    assert_eq!(finances.len(), 1);
    assert_eq!(finances[0].amount_cents, 10_000);
}

#[tokio::test]
async fn payment_after_full_settlement_is_overpay() {
    let app = TestApp::new().await;
    let sent = app.sent_invoice(10_000).await;
    app.pay(sent.invoice.id, 10_000).await.unwrap();

    let err = app.pay(sent.invoice.id, 1).await.unwrap_err();
    assert_matches!(
        err,
        ServiceError::Overpay {
            attempted_cents: 1,
            remaining_cents: 0
        }
    );
}

#[tokio::test]
async fn overpay_writes_nothing() {
    let app = TestApp::new().await;
    let sent = app.sent_invoice(10_000).await;
    app.pay(sent.invoice.id, 6_000).await.unwrap();

    let err = app.pay(sent.invoice.id, 4_001).await.unwrap_err();
    assert_matches!(
        err,
        ServiceError::Overpay {
            attempted_cents: 4_001,
            remaining_cents: 4_000
        }
    );

    let summary = app
        .services
        .payments
        .payment_summary(app.ctx, sent.invoice.id)
        .await
        .unwrap();
    assert_eq!(summary.paid_cents, 6_000);
    assert_eq!(summary.status, InvoiceStatus::Sent);
}

#[tokio::test]
async fn payments_require_a_sent_invoice() {
    let app = TestApp::new().await;
    let draft = app.draft_invoice(1_000).await;

    let err = app.pay(draft.invoice.id, 100).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));

    app.services
        .invoices
        .transition(app.ctx, draft.invoice.id, InvoiceStatus::Cancelled)
        .await
        .unwrap();
    let err = app.pay(draft.invoice.id, 100).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn non_positive_amount_is_rejected() {
    let app = TestApp::new().await;
    let sent = app.sent_invoice(1_000).await;

    assert_matches!(
        app.pay(sent.invoice.id, 0).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        app.pay(sent.invoice.id, -5).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn invalid_metadata_is_rejected() {
    let app = TestApp::new().await;
    let sent = app.sent_invoice(1_000).await;

    let mut input = payment(sent.invoice.id, 500);
    input.metadata = Some(PaymentMetadata {
        card_last4: Some("12a4".to_string()),
        ..Default::default()
    });
    let err = app
        .services
        .payments
        .record_payment(app.ctx, input)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn metadata_round_trips_through_storage() {
    let app = TestApp::new().await;
    let sent = app.sent_invoice(1_000).await;

    let metadata = PaymentMetadata {
        processor: Some("stripe".to_string()),
        processor_reference: Some("ch_123".to_string()),
        card_last4: Some("4242".to_string()),
        settlement: false,
    };
    let mut input = payment(sent.invoice.id, 500);
    input.metadata = Some(metadata.clone());
    let outcome = app
        .services
        .payments
        .record_payment(app.ctx, input)
        .await
        .unwrap();

    let stored = app
        .services
        .payments
        .list_payments(app.ctx, sent.invoice.id, false)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, outcome.payment.id);
    assert_eq!(stored[0].metadata().unwrap(), Some(metadata));
}

#[tokio::test]
async fn reversal_demotes_paid_invoice_and_undoes_bookings() {
    let app = TestApp::new().await;
    let sent = app.sent_invoice(10_000).await;
    let id = sent.invoice.id;
    app.pay(id, 6_000).await.unwrap();
    let last = app.pay(id, 4_000).await.unwrap();

    let reversal = app
        .services
        .payments
        .reverse_payment(app.ctx, last.payment.id)
        .await
        .unwrap();
    assert!(reversal.demoted);
    assert_eq!(reversal.remaining_cents, 4_000);
    assert_eq!(reversal.invoice.status, InvoiceStatus::Sent);
    assert!(reversal.invoice.paid_at.is_none());
    assert!(reversal.payment.is_reversed());
    assert_eq!(reversal.payment.deleted_by, Some(app.ctx.actor_id));

    let entries = app
        .services
        .accounting
        .ledger_entries_for_invoice(app.ctx, id)
        .await
        .unwrap();
    assert!(entries
        .iter()
        .all(|e| e.source_type != LedgerSourceType::CashSale));

    let live = app
        .services
        .accounting
        .finance_records_for_invoice(app.ctx, id, false)
        .await
        .unwrap();
    assert!(live.is_empty());
    let all = app
        .services
        .accounting
        .finance_records_for_invoice(app.ctx, id, true)
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].deleted_at.is_some());

    let summary = app
        .services
        .payments
        .payment_summary(app.ctx, id)
        .await
        .unwrap();
    assert_eq!(summary.paid_cents, 6_000);
    assert_eq!(summary.remaining_cents, 4_000);
}

#[tokio::test]
async fn paying_again_after_reversal_rebooks_once() {
    let app = TestApp::new().await;
    let sent = app.sent_invoice(10_000).await;
    let id = sent.invoice.id;
    let paid = app.pay(id, 10_000).await.unwrap();
    app.services
        .payments
        .reverse_payment(app.ctx, paid.payment.id)
        .await
        .unwrap();

    let again = app.pay(id, 10_000).await.unwrap();
    assert!(again.promoted);

    let live = app
        .services
        .accounting
        .finance_records_for_invoice(app.ctx, id, false)
        .await
        .unwrap();
    assert_eq!(live.len(), 1);
    let all = app
        .services
        .accounting
        .finance_records_for_invoice(app.ctx, id, true)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let cash_sales = app
        .services
        .accounting
        .ledger_entries_for_invoice(app.ctx, id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.source_type == LedgerSourceType::CashSale)
        .count();
    assert_eq!(cash_sales, 1);
}

#[tokio::test]
async fn reversal_on_unpaid_invoice_keeps_status() {
    let app = TestApp::new().await;
    let sent = app.sent_invoice(10_000).await;
    let first = app.pay(sent.invoice.id, 3_000).await.unwrap();

    let reversal = app
        .services
        .payments
        .reverse_payment(app.ctx, first.payment.id)
        .await
        .unwrap();
    assert!(!reversal.demoted);
    assert_eq!(reversal.invoice.status, InvoiceStatus::Sent);
    assert_eq!(reversal.remaining_cents, 10_000);
}

#[tokio::test]
async fn reversing_twice_is_not_found() {
    let app = TestApp::new().await;
    let sent = app.sent_invoice(1_000).await;
    let paid = app.pay(sent.invoice.id, 400).await.unwrap();
    let payments = &app.services.payments;

    payments
        .reverse_payment(app.ctx, paid.payment.id)
        .await
        .unwrap();
    let err = payments
        .reverse_payment(app.ctx, paid.payment.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let err = payments
        .reverse_payment(app.ctx, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let all = payments
        .list_payments(app.ctx, sent.invoice.id, true)
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert!(payments
        .list_payments(app.ctx, sent.invoice.id, false)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn other_business_cannot_pay_or_reverse() {
    let app = TestApp::new().await;
    let sent = app.sent_invoice(1_000).await;
    let paid = app.pay(sent.invoice.id, 500).await.unwrap();
    let stranger = app.other_business();

    let err = app
        .services
        .payments
        .record_payment(stranger, payment(sent.invoice.id, 100))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let err = app
        .services
        .payments
        .reverse_payment(stranger, paid.payment.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

/// The harness pool holds a single SQLite connection, so racing payments are
/// serialized by the pool rather than by the invoice row lock. This checks the
/// overpay guard under interleaved callers, not `FOR UPDATE` semantics.
#[tokio::test]
async fn serialized_concurrent_payments_never_overpay() {
    let app = Arc::new(TestApp::new().await);
    let sent = app.sent_invoice(10_000).await;
    let id = sent.invoice.id;

    let attempts = (0..5).map(|_| {
        let app = app.clone();
        tokio::spawn(async move { app.pay(id, 3_000).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let overpaid = results
        .iter()
        .filter(|r| matches!(r, Err(ServiceError::Overpay { .. })))
        .count();
    assert_eq!(accepted, 3);
    assert_eq!(overpaid, 2);

    let summary = app
        .services
        .payments
        .payment_summary(app.ctx, id)
        .await
        .unwrap();
    assert_eq!(summary.paid_cents, 9_000);
    assert_eq!(summary.remaining_cents, 1_000);
    assert_eq!(summary.status, InvoiceStatus::Sent);
}
