//! End-to-end settlement properties against a live PostgreSQL.
//!
//! Run with `DATABASE_URL=postgresql://... cargo test --test settlement_flow`.
//! Tests skip when no database is reachable.

#[macro_use]
mod common;

use futures::future::join_all;
use tokio::sync::mpsc;
use uuid::Uuid;

use case_market::audit::{self, HistoryAction, HistoryEntry};
use case_market::cases::CaseRepository;
use case_market::payments::{CallbackOutcome, ProviderEvent, ProviderEventKind};
use case_market::{
    AuditTrail, CaseStatus, MarketError, PaymentStatus, QuoteStatus, QuoteSubmission,
    SettlementTrigger,
};
use common::{harness, harness_with, new_client, new_lawyer};

fn provider_event(kind: ProviderEventKind) -> ProviderEvent {
    ProviderEvent {
        kind,
        correlation_id: None,
        reference_id: None,
        payment_ref: None,
        amount_cents: None,
        receipt: None,
        failure_reason: None,
    }
}

// ============================================================================
// Single winner
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settlements_single_winner() {
    let h = require_db!(harness());
    let client = new_client();
    let case = h.open_case(&client).await;

    let mut payments = Vec::new();
    for i in 0..5 {
        let lawyer = new_lawyer();
        let quote = h.quote(&lawyer, case.id, 10_000 + i * 1_000, 10).await;
        payments.push(h.pay(&client, quote.id).await);
    }

    let attempts = payments.iter().map(|p| {
        let engine = h.engine.clone();
        let payment_id = p.id;
        tokio::spawn(async move { engine.settle_direct(payment_id).await })
    });
    let outcomes: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let winners: Vec<_> = outcomes.iter().filter(|o| o.engaged).collect();
    assert_eq!(winners.len(), 1, "exactly one settlement engages the case");
    let winner = winners[0];
    assert!(!winner.needs_reconciliation);
    assert_eq!(
        outcomes.iter().filter(|o| o.needs_reconciliation).count(),
        4,
        "every other settlement is flagged for reconciliation"
    );

    let case = h.cases.get(case.id).await.unwrap();
    assert_eq!(case.status, CaseStatus::Engaged);
    assert_eq!(case.accepted_quote_id, Some(winner.quote_id));
    assert!(case.engaged_at.is_some());

    let mut conn = h.db.pool().acquire().await.unwrap();
    let quotes = case_market::quotes::QuoteRepository::list_for_case(&mut conn, case.id)
        .await
        .unwrap();
    assert_eq!(
        quotes.iter().filter(|q| q.status == QuoteStatus::Accepted).count(),
        1
    );
    assert_eq!(
        quotes.iter().filter(|q| q.status == QuoteStatus::Rejected).count(),
        4
    );
    assert_eq!(h.history_count(case.id, "engaged").await, 1);

    // Source behavior: losing payments are still settled
    for p in &payments {
        let p = h.checkout.get(p.id).await.unwrap();
        assert_eq!(p.status, PaymentStatus::Settled);
    }
}

// ============================================================================
// Idempotent settlement
// ============================================================================

#[tokio::test]
async fn test_repeated_settlement_is_noop() {
    let h = require_db!(harness());
    let client = new_client();
    let lawyer = new_lawyer();
    let case = h.open_case(&client).await;
    let quote = h.quote(&lawyer, case.id, 50_000, 5).await;
    let payment = h.pay(&client, quote.id).await;

    let first = h.engine.settle_direct(payment.id).await.unwrap();
    assert!(first.engaged);
    assert!(!first.already_settled);

    let second = h.engine.settle_direct(payment.id).await.unwrap();
    assert!(second.already_settled);
    assert!(!second.engaged);

    assert_eq!(h.history_count(case.id, "engaged").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_completion() {
    let h = require_db!(harness());
    let client = new_client();
    let lawyer = new_lawyer();
    let case = h.open_case(&client).await;
    let quote = h.quote(&lawyer, case.id, 50_000, 5).await;
    let payment = h.pay(&client, quote.id).await;

    let attempts = (0..8).map(|_| {
        let engine = h.engine.clone();
        let payment_id = payment.id;
        tokio::spawn(async move { engine.settle_direct(payment_id).await })
    });
    let outcomes: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| !o.already_settled).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| o.engaged).count(), 1);
    assert_eq!(h.history_count(case.id, "engaged").await, 1);
}

#[tokio::test]
async fn test_settle_unknown_payment() {
    let h = require_db!(harness());
    let result = h.engine.settle_direct(Uuid::new_v4()).await;
    assert!(matches!(result, Err(MarketError::NotFound(_))));
}

// ============================================================================
// Quote lifecycle
// ============================================================================

#[tokio::test]
async fn test_two_lawyers_client_pays_second() {
    let h = require_db!(harness());
    let client = new_client();
    let lawyer_a = new_lawyer();
    let lawyer_b = new_lawyer();
    let case = h.open_case(&client).await;

    let quote_a = h.quote(&lawyer_a, case.id, 500, 5).await;
    let quote_b = h.quote(&lawyer_b, case.id, 700, 3).await;

    let payment = h.pay(&client, quote_b.id).await;
    assert_eq!(payment.amount_cents, 700);
    h.engine.settle_direct(payment.id).await.unwrap();

    let case = h.cases.get(case.id).await.unwrap();
    assert_eq!(case.status, CaseStatus::Engaged);
    assert_eq!(case.accepted_quote_id, Some(quote_b.id));
    assert_eq!(case.accepted_lawyer_id, Some(lawyer_b.id));
    assert_eq!(
        h.quotes.get(quote_a.id).await.unwrap().status,
        QuoteStatus::Rejected
    );
    assert_eq!(
        h.quotes.get(quote_b.id).await.unwrap().status,
        QuoteStatus::Accepted
    );

    // Both quotes are now frozen, and no newcomer may bid
    let err = h
        .quotes
        .submit_or_update(&lawyer_a, QuoteSubmission::new(case.id, 400, 5, ""))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    let err = h
        .quotes
        .submit_or_update(&new_lawyer(), QuoteSubmission::new(case.id, 300, 2, ""))
        .await
        .unwrap_err();
    assert_eq!(err, MarketError::conflict("case is not open"));
}

#[tokio::test]
async fn test_resubmission_overwrites_single_quote() {
    let h = require_db!(harness());
    let client = new_client();
    let lawyer = new_lawyer();
    let case = h.open_case(&client).await;

    let first = h.quote(&lawyer, case.id, 1_000, 10).await;
    let second = h.quote(&lawyer, case.id, 800, 7).await;
    assert_eq!(first.id, second.id);
    assert_eq!(second.amount_cents, 800);
    assert_eq!(second.days, 7);
    assert_eq!(second.status, QuoteStatus::Proposed);

    let mut conn = h.db.pool().acquire().await.unwrap();
    let quotes = case_market::quotes::QuoteRepository::list_for_case(&mut conn, case.id)
        .await
        .unwrap();
    assert_eq!(quotes.len(), 1);
}

#[tokio::test]
async fn test_quote_role_and_case_checks() {
    let h = require_db!(harness());
    let client = new_client();

    let err = h
        .quotes
        .submit_or_update(&client, QuoteSubmission::new(Uuid::new_v4(), 500, 5, ""))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)));

    let err = h
        .quotes
        .submit_or_update(&new_lawyer(), QuoteSubmission::new(Uuid::new_v4(), 500, 5, ""))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
}

// ============================================================================
// Checkout
// ============================================================================

#[tokio::test]
async fn test_start_settlement_rules() {
    let h = require_db!(harness());
    let client = new_client();
    let lawyer = new_lawyer();
    let case = h.open_case(&client).await;
    let quote = h.quote(&lawyer, case.id, 2_500, 4).await;

    let missing = h.checkout.start_settlement(Uuid::new_v4(), &client).await;
    assert!(matches!(missing, Err(MarketError::NotFound(_))));

    let stranger = h.checkout.start_settlement(quote.id, &new_client()).await;
    assert!(matches!(stranger, Err(MarketError::Forbidden(_))));

    let first = h.pay(&client, quote.id).await;
    let again = h.pay(&client, quote.id).await;
    assert_eq!(first.id, again.id, "initiated payment is reused");
    assert_eq!(first.status, PaymentStatus::Initiated);

    h.engine.settle_direct(first.id).await.unwrap();
    let after = h.checkout.start_settlement(quote.id, &client).await;
    assert!(matches!(after, Err(MarketError::Conflict(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checkout_single_payment() {
    let h = require_db!(harness());
    let client = new_client();
    let lawyer = new_lawyer();
    let case = h.open_case(&client).await;
    let quote = h.quote(&lawyer, case.id, 2_500, 4).await;

    let attempts = (0..6).map(|_| {
        let checkout = h.checkout.clone();
        let quote_id = quote.id;
        tokio::spawn(async move { checkout.start_settlement(quote_id, &client).await })
    });
    let ids: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap().id)
        .collect();
    assert!(ids.iter().all(|id| *id == ids[0]));
}

#[tokio::test]
async fn test_failed_payment_frees_quote() {
    let h = require_db!(harness());
    let client = new_client();
    let lawyer = new_lawyer();
    let case = h.open_case(&client).await;
    let quote = h.quote(&lawyer, case.id, 9_900, 14).await;

    let first = h.pay(&client, quote.id).await;
    let failed = h.checkout.mark_failed(first.id, "card declined").await.unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("card declined"));

    // Repeat is a no-op
    let again = h.checkout.mark_failed(first.id, "other").await.unwrap();
    assert_eq!(again.failure_reason.as_deref(), Some("card declined"));

    // A failed payment never settles
    let err = h.engine.settle_direct(first.id).await.unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));
    let err = h
        .checkout
        .attach_provider_session(first.id, "cs_late")
        .await
        .unwrap_err();
    assert_eq!(err, MarketError::conflict("payment is failed"));

    let second = h.pay(&client, quote.id).await;
    assert_ne!(second.id, first.id);
    h.engine.settle_direct(second.id).await.unwrap();

    let err = h.checkout.mark_failed(second.id, "late").await.unwrap_err();
    assert_eq!(err, MarketError::conflict("payment already settled"));
}

// ============================================================================
// Amount verification
// ============================================================================

#[tokio::test]
async fn test_stale_payment_amount_aborts_settlement() {
    let h = require_db!(harness());
    let client = new_client();
    let lawyer = new_lawyer();
    let case = h.open_case(&client).await;
    let quote = h.quote(&lawyer, case.id, 500, 5).await;
    let payment = h.pay(&client, quote.id).await;

    // Lawyer raises the price after checkout started
    h.quote(&lawyer, case.id, 600, 5).await;

    let err = h.engine.settle_direct(payment.id).await.unwrap_err();
    assert_eq!(err, MarketError::conflict("amount mismatch"));

    // Nothing moved
    assert_eq!(h.cases.get(case.id).await.unwrap().status, CaseStatus::Open);
    assert_eq!(
        h.quotes.get(quote.id).await.unwrap().status,
        QuoteStatus::Proposed
    );
    assert_eq!(
        h.checkout.get(payment.id).await.unwrap().status,
        PaymentStatus::Initiated
    );
    assert_eq!(h.history_count(case.id, "engaged").await, 0);

    // Re-checkout refreshes the amount (no provider session yet) and settles
    let refreshed = h.pay(&client, quote.id).await;
    assert_eq!(refreshed.id, payment.id);
    assert_eq!(refreshed.amount_cents, 600);
    assert!(h.engine.settle_direct(payment.id).await.unwrap().engaged);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_quote_update_races_settlement() {
    let h = require_db!(harness());
    let client = new_client();
    let lawyer = new_lawyer();
    let rival = new_lawyer();
    let case = h.open_case(&client).await;
    let quote = h.quote(&lawyer, case.id, 500, 5).await;
    let rival_quote = h.quote(&rival, case.id, 700, 3).await;
    let payment = h.pay(&client, quote.id).await;

    let (raised, rival_update, settled) = tokio::join!(
        h.quotes
            .submit_or_update(&lawyer, QuoteSubmission::new(case.id, 650, 5, "revised")),
        h.quotes
            .submit_or_update(&rival, QuoteSubmission::new(case.id, 600, 2, "undercut")),
        h.engine.settle_direct(payment.id),
    );

    let final_case = h.cases.get(case.id).await.unwrap();
    let paid_quote = h.quotes.get(quote.id).await.unwrap();
    let rival_final = h.quotes.get(rival_quote.id).await.unwrap();
    let stored_payment = h.checkout.get(payment.id).await.unwrap();

    match settled {
        Ok(outcome) => {
            // Settlement took the case lock before the paid quote's update
            assert!(outcome.engaged);
            assert_eq!(raised.unwrap_err(), MarketError::conflict("case is not open"));
            assert_eq!(final_case.status, CaseStatus::Engaged);
            assert_eq!(final_case.accepted_quote_id, Some(quote.id));
            assert_eq!(paid_quote.status, QuoteStatus::Accepted);
            assert_eq!(paid_quote.amount_cents, 500);
            assert_eq!(stored_payment.status, PaymentStatus::Settled);
            assert_eq!(rival_final.status, QuoteStatus::Rejected);
            match rival_update {
                Ok(updated) => {
                    assert_eq!(updated.amount_cents, 600);
                    assert_eq!(rival_final.amount_cents, 600);
                }
                Err(e) => {
                    assert_eq!(e, MarketError::conflict("case is not open"));
                    assert_eq!(rival_final.amount_cents, 700);
                }
            }
            assert_eq!(h.history_count(case.id, "engaged").await, 1);
        }
        Err(e) => {
            // The update committed first; settlement must leave no trace
            assert_eq!(e, MarketError::conflict("amount mismatch"));
            assert_eq!(raised.unwrap().amount_cents, 650);
            assert_eq!(rival_update.unwrap().amount_cents, 600);
            assert_eq!(final_case.status, CaseStatus::Open);
            assert!(final_case.accepted_quote_id.is_none());
            assert_eq!(paid_quote.status, QuoteStatus::Proposed);
            assert_eq!(rival_final.status, QuoteStatus::Proposed);
            assert_eq!(stored_payment.status, PaymentStatus::Initiated);
            assert_eq!(h.history_count(case.id, "engaged").await, 0);
        }
    }
}

#[tokio::test]
async fn test_provider_amount_mismatch_aborts() {
    let h = require_db!(harness());
    let client = new_client();
    let case = h.open_case(&client).await;
    let quote = h.quote(&new_lawyer(), case.id, 4_200, 5).await;
    let payment = h.pay(&client, quote.id).await;

    let trigger = SettlementTrigger {
        confirmed_amount: Some(4_100),
        ..SettlementTrigger::direct(payment.id)
    };
    let err = h.engine.attempt(&trigger).await.unwrap_err();
    assert_eq!(err, MarketError::conflict("amount mismatch"));
    assert_eq!(
        h.checkout.get(payment.id).await.unwrap().status,
        PaymentStatus::Initiated
    );
}

// ============================================================================
// Provider callbacks
// ============================================================================

#[tokio::test]
async fn test_callback_resolves_by_session() {
    let h = require_db!(harness());
    let client = new_client();
    let case = h.open_case(&client).await;
    let quote = h.quote(&new_lawyer(), case.id, 12_000, 20).await;
    let payment = h.pay(&client, quote.id).await;

    let session = format!("cs_{}", Uuid::new_v4().simple());
    h.checkout
        .attach_provider_session(payment.id, &session)
        .await
        .unwrap();
    // Same session again is fine, a different one is not
    h.checkout
        .attach_provider_session(payment.id, &session)
        .await
        .unwrap();
    let err = h
        .checkout
        .attach_provider_session(payment.id, "cs_other")
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    let provider_ref = format!("pi_{}", Uuid::new_v4().simple());
    let event = ProviderEvent {
        correlation_id: Some(session),
        payment_ref: Some(provider_ref.clone()),
        amount_cents: Some(12_000),
        receipt: Some("R-1001".to_string()),
        ..provider_event(ProviderEventKind::Completed)
    };
    let outcome = h.callbacks.process(&event).await.unwrap();
    assert!(matches!(outcome, CallbackOutcome::Settled(o) if o.engaged));

    let stored = h.checkout.get(payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Settled);
    assert_eq!(stored.provider_payment_id.as_deref(), Some(provider_ref.as_str()));

    let history = h.cases.list_history(case.id, &client).await.unwrap();
    let engaged = history
        .iter()
        .find(|e| e.action == HistoryAction::Engaged.as_str())
        .unwrap();
    assert_eq!(engaged.reason, "payment completed (provider: R-1001)");
    assert_eq!(engaged.actor_id, client.id);

    // Provider retries the same notification
    let outcome = h.callbacks.process(&event).await.unwrap();
    assert!(matches!(outcome, CallbackOutcome::Settled(o) if o.already_settled));
}

#[tokio::test]
async fn test_payer_cannot_abandon_attached_checkout() {
    let h = require_db!(harness());
    let client = new_client();
    let case = h.open_case(&client).await;
    let quote = h.quote(&new_lawyer(), case.id, 8_000, 10).await;

    // Before the provider has a session the payer may walk away
    let first = h.pay(&client, quote.id).await;
    let abandoned = h.checkout.abandon(first.id, "changed mind").await.unwrap();
    assert_eq!(abandoned.status, PaymentStatus::Failed);

    let second = h.pay(&client, quote.id).await;
    assert_ne!(second.id, first.id);
    let session = format!("cs_{}", Uuid::new_v4().simple());
    h.checkout
        .attach_provider_session(second.id, &session)
        .await
        .unwrap();

    let err = h.checkout.abandon(second.id, "changed mind").await.unwrap_err();
    assert_eq!(
        err,
        MarketError::conflict("provider session attached; awaiting provider outcome")
    );
    assert_eq!(
        h.checkout.get(second.id).await.unwrap().status,
        PaymentStatus::Initiated
    );

    // The provider captured anyway; its completion still lands
    let event = ProviderEvent {
        correlation_id: Some(session),
        amount_cents: Some(8_000),
        ..provider_event(ProviderEventKind::Completed)
    };
    let outcome = h.callbacks.process(&event).await.unwrap();
    assert!(matches!(outcome, CallbackOutcome::Settled(o) if o.engaged));
    assert_eq!(h.cases.get(case.id).await.unwrap().status, CaseStatus::Engaged);

    let err = h.checkout.abandon(second.id, "too late").await.unwrap_err();
    assert_eq!(err, MarketError::conflict("payment already settled"));
}

#[tokio::test]
async fn test_callback_falls_back_to_reference() {
    let h = require_db!(harness());
    let client = new_client();
    let case = h.open_case(&client).await;
    let quote = h.quote(&new_lawyer(), case.id, 3_000, 2).await;
    let payment = h.pay(&client, quote.id).await;

    let event = ProviderEvent {
        correlation_id: Some("cs_never_attached".to_string()),
        reference_id: Some(payment.id.to_string()),
        ..provider_event(ProviderEventKind::Completed)
    };
    let outcome = h.callbacks.process(&event).await.unwrap();
    assert!(matches!(outcome, CallbackOutcome::Settled(_)));

    let unknown = ProviderEvent {
        reference_id: Some(Uuid::new_v4().to_string()),
        ..provider_event(ProviderEventKind::Completed)
    };
    let err = h.callbacks.process(&unknown).await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
}

#[tokio::test]
async fn test_callback_expired_marks_failed() {
    let h = require_db!(harness());
    let client = new_client();
    let case = h.open_case(&client).await;
    let quote = h.quote(&new_lawyer(), case.id, 3_000, 2).await;
    let payment = h.pay(&client, quote.id).await;

    let event = ProviderEvent {
        reference_id: Some(payment.id.to_string()),
        ..provider_event(ProviderEventKind::Expired)
    };
    match h.callbacks.process(&event).await.unwrap() {
        CallbackOutcome::Failed(p) => {
            assert_eq!(p.status, PaymentStatus::Failed);
            assert_eq!(p.failure_reason.as_deref(), Some("checkout expired"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(h.cases.get(case.id).await.unwrap().status, CaseStatus::Open);
}

// ============================================================================
// Cancel / close / history
// ============================================================================

#[tokio::test]
async fn test_cancel_open_case() {
    let h = require_db!(harness());
    let client = new_client();
    let case = h.open_case(&client).await;

    let err = h.cases.cancel(case.id, &new_client(), "").await.unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)));

    let cancelled = h.cases.cancel(case.id, &client, "found help elsewhere").await.unwrap();
    assert_eq!(cancelled.status, CaseStatus::Cancelled);

    let err = h.cases.cancel(case.id, &client, "").await.unwrap_err();
    assert_eq!(err, MarketError::conflict("case cannot be cancelled"));
    let err = h.cases.close(case.id, &client, "").await.unwrap_err();
    assert_eq!(err, MarketError::conflict("only engaged cases can be closed"));

    let err = h
        .quotes
        .submit_or_update(&new_lawyer(), QuoteSubmission::new(case.id, 500, 5, ""))
        .await
        .unwrap_err();
    assert_eq!(err, MarketError::conflict("case is not open"));

    let history = h.cases.list_history(case.id, &client).await.unwrap();
    let actions: Vec<_> = history.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, ["created", "cancelled"]);
    assert_eq!(history[1].reason, "found help elsewhere");
    assert_eq!(history[1].old_status, Some(CaseStatus::Open));
    assert_eq!(history[1].new_status, Some(CaseStatus::Cancelled));
}

#[tokio::test]
async fn test_close_engaged_case_and_history_access() {
    let h = require_db!(harness());
    let client = new_client();
    let winner = new_lawyer();
    let loser = new_lawyer();
    let case = h.open_case(&client).await;
    let quote = h.quote(&winner, case.id, 80_000, 30).await;
    h.quote(&loser, case.id, 70_000, 30).await;

    // Still open: only the owner may read history
    let err = h.cases.list_history(case.id, &winner).await.unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)));

    let payment = h.pay(&client, quote.id).await;
    h.engine.settle_direct(payment.id).await.unwrap();

    let err = h.cases.cancel(case.id, &client, "").await.unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    let closed = h.cases.close(case.id, &client, "work delivered").await.unwrap();
    assert_eq!(closed.status, CaseStatus::Closed);
    assert_eq!(closed.accepted_quote_id, Some(quote.id));

    let history = h.cases.list_history(case.id, &winner).await.unwrap();
    let actions: Vec<_> = history.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, ["created", "engaged", "closed"]);
    assert_eq!(history[1].reason, "payment completed (mock)");

    let err = h.cases.list_history(case.id, &loser).await.unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_races_settlement() {
    let h = require_db!(harness());
    let client = new_client();
    let case = h.open_case(&client).await;
    let quote = h.quote(&new_lawyer(), case.id, 1_500, 3).await;
    let payment = h.pay(&client, quote.id).await;

    let (settled, cancelled) = tokio::join!(
        h.engine.settle_direct(payment.id),
        h.cases.cancel(case.id, &client, "changed my mind"),
    );
    let settled = settled.unwrap();
    let final_case = h.cases.get(case.id).await.unwrap();

    match cancelled {
        Ok(_) => {
            // Cancel won the case lock; settlement found a non-open case
            assert_eq!(final_case.status, CaseStatus::Cancelled);
            assert!(!settled.engaged);
            assert!(settled.needs_reconciliation);
        }
        Err(e) => {
            assert_eq!(e, MarketError::conflict("case cannot be cancelled"));
            assert_eq!(final_case.status, CaseStatus::Engaged);
            assert!(settled.engaged);
        }
    }
}

// ============================================================================
// Audit trail
// ============================================================================

#[tokio::test]
async fn test_audit_failure_keeps_transaction_and_defers() {
    let (tx, mut rx) = mpsc::channel(4);
    let h = require_db!(harness_with(AuditTrail::new(tx.clone())));
    let trail = AuditTrail::new(tx);
    let client = new_client();
    let case = h.open_case(&client).await;

    let mut db_tx = h.db.pool().begin().await.unwrap();
    CaseRepository::transition(&mut db_tx, case.id, CaseStatus::Open, CaseStatus::Cancelled)
        .await
        .unwrap();

    // action column is VARCHAR(50); this insert fails inside its savepoint
    let mut entry = HistoryEntry::transition(
        case.id,
        client.id,
        HistoryAction::Cancelled,
        CaseStatus::Open,
        CaseStatus::Cancelled,
        "oversized action",
    );
    entry.action = "x".repeat(60);
    let failed = trail.record(&mut db_tx, entry.clone()).await;
    assert_eq!(failed.as_ref().map(|e| e.id), Some(entry.id));

    // Outer transaction is still usable and commits
    let locked = CaseRepository::get(&mut db_tx, case.id).await.unwrap().unwrap();
    assert_eq!(locked.status, CaseStatus::Cancelled);
    db_tx.commit().await.unwrap();
    assert_eq!(
        h.cases.get(case.id).await.unwrap().status,
        CaseStatus::Cancelled
    );

    trail.defer(failed);
    let queued = rx.recv().await.unwrap();
    assert_eq!(queued.id, entry.id);

    // A normal entry goes straight through
    let mut db_tx = h.db.pool().begin().await.unwrap();
    let ok_entry = HistoryEntry::new(
        case.id,
        client.id,
        HistoryAction::Created,
        None,
        CaseStatus::Cancelled,
        "backfill",
    );
    assert!(trail.record(&mut db_tx, ok_entry.clone()).await.is_none());
    db_tx.commit().await.unwrap();

    let history = audit::writer::list_for_case(h.db.pool(), case.id).await.unwrap();
    assert!(history.iter().any(|e| e.id == ok_entry.id));
    assert!(!history.iter().any(|e| e.id == entry.id));
}
