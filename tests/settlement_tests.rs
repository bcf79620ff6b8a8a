use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use wallet_ledger::application::engine::{CreditRequest, DebitRequest, WebhookOutcome};
use wallet_ledger::domain::ports::Inserted;
use wallet_ledger::domain::transaction::{
    Flow, NewTransaction, PaymentGateway, TransactionMetadata, TransactionStatus, TransactionType,
    UserId,
};
use wallet_ledger::error::WalletError;

mod common;

fn credit(amount: Decimal) -> CreditRequest {
    CreditRequest {
        amount,
        currency: "INR".to_string(),
        transaction_id: None,
    }
}

fn debit(amount: Decimal) -> DebitRequest {
    DebitRequest {
        amount,
        currency: "INR".to_string(),
        reference: None,
    }
}

#[tokio::test]
async fn test_webhook_replay_settles_once() {
    let fx = common::fixture();
    let user: UserId = "alice".into();
    let (body, header) = common::signed_recharge(&fx.verifier, "evt_replay", "alice");

    let first = fx.engine.handle_webhook(body.as_bytes(), &header).await.unwrap();
    let second = fx.engine.handle_webhook(body.as_bytes(), &header).await.unwrap();

    assert!(matches!(first.outcome, WebhookOutcome::Settled(_)));
    assert!(matches!(second.outcome, WebhookOutcome::Duplicate(Some(_))));

    let history = fx.engine.transactions(&user).try_collect().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TransactionStatus::Completed);
    assert_eq!(fx.engine.wallet(&user).await.unwrap().balance.value(), dec!(100));
    common::assert_ledger_matches_wallet(&fx.engine, &user).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_deliveries_settle_once() {
    let fx = common::fixture();
    let user: UserId = "bob".into();
    let (body, header) = common::signed_recharge(&fx.verifier, "evt_storm", "bob");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = fx.engine.clone();
        let body = body.clone();
        let header = header.clone();
        handles.push(tokio::spawn(async move {
            engine.handle_webhook(body.as_bytes(), &header).await.unwrap()
        }));
    }

    let mut settled = Vec::new();
    let mut duplicates = Vec::new();
    for handle in handles {
        match handle.await.unwrap().outcome {
            WebhookOutcome::Settled(tx) => settled.push(tx),
            WebhookOutcome::Duplicate(Some(tx)) => duplicates.push(tx),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(settled.len(), 1);
    assert_eq!(duplicates.len(), 15);
    assert!(duplicates.iter().all(|tx| tx.id == settled[0].id));
    assert_eq!(fx.engine.wallet(&user).await.unwrap().balance.value(), dec!(100));
    common::assert_ledger_matches_wallet(&fx.engine, &user).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw() {
    let fx = common::fixture();
    let user: UserId = "carol".into();
    fx.engine.credit(&user, credit(dec!(10))).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..25 {
        let engine = fx.engine.clone();
        let user = user.clone();
        handles.push(tokio::spawn(async move { engine.debit(&user, debit(dec!(3))).await }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(WalletError::InsufficientBalance { .. }) => {}
            Err(e) => panic!("unexpected error {e}"),
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(fx.engine.wallet(&user).await.unwrap().balance.value(), dec!(1));
    common::assert_ledger_matches_wallet(&fx.engine, &user).await;
}

#[tokio::test]
async fn test_debit_rejection_leaves_wallet_untouched() {
    let fx = common::fixture();
    let user: UserId = "dave".into();
    fx.engine.credit(&user, credit(dec!(5))).await.unwrap();
    let before = fx.engine.wallet(&user).await.unwrap();

    let err = fx.engine.debit(&user, debit(dec!(5.01))).await.unwrap_err();
    assert!(matches!(
        err,
        WalletError::InsufficientBalance { required, available }
            if required == dec!(5.01) && available == dec!(5)
    ));
    assert_eq!(err.status(), 400);
    assert_eq!(fx.engine.wallet(&user).await.unwrap(), before);
    common::assert_ledger_matches_wallet(&fx.engine, &user).await;
}

#[tokio::test]
async fn test_credit_creates_missing_wallet() {
    let fx = common::fixture();
    let user: UserId = "erin".into();

    let receipt = fx.engine.credit(&user, credit(dec!(100))).await.unwrap();

    assert_eq!(receipt.wallet.balance.value(), dec!(100));
    assert_eq!(receipt.wallet.transactions, vec![receipt.transaction.id]);
    assert_eq!(receipt.transaction.status, TransactionStatus::Completed);
    assert_eq!(receipt.transaction.currency, "INR");
    assert_eq!(receipt.transaction.gateway, PaymentGateway::System);
    common::assert_ledger_matches_wallet(&fx.engine, &user).await;
}

#[tokio::test]
async fn test_credit_to_existing_wallet_needs_transaction() {
    let fx = common::fixture();
    let user: UserId = "frank".into();
    fx.engine.credit(&user, credit(dec!(20))).await.unwrap();

    let err = fx.engine.credit(&user, credit(dec!(20))).await.unwrap_err();

    assert!(matches!(err, WalletError::Validation(_)));
    assert_eq!(fx.engine.wallet(&user).await.unwrap().balance.value(), dec!(20));
    common::assert_ledger_matches_wallet(&fx.engine, &user).await;
}

#[tokio::test]
async fn test_checkout_verification_checks_owner() {
    let fx = common::fixture();
    fx.sessions
        .insert(common::checkout_session("grace", "tokens-100", "wallet-recharge", 999))
        .await;

    let err = fx
        .engine
        .verify_checkout(&"mallory".into(), "cs_grace_tokens-100")
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::Forbidden(_)));
    assert_eq!(err.status(), 403);
    assert!(fx.engine.wallet(&"grace".into()).await.is_err());
    assert!(fx.engine.wallet(&"mallory".into()).await.is_err());

    let status = fx
        .engine
        .verify_checkout(&"grace".into(), "cs_grace_tokens-100")
        .await
        .unwrap();
    assert_eq!(status.status.as_deref(), Some("complete"));
}

#[tokio::test]
async fn test_mark_completed_twice_does_not_reapply() {
    let fx = common::fixture();
    let user: UserId = "heidi".into();
    let ack = fx.engine.settle_event(common::recharge("evt_h", "heidi")).await.unwrap();
    let WebhookOutcome::Settled(tx) = ack.outcome else {
        panic!("expected settlement");
    };

    let again = fx.engine.ledger().mark_completed(tx.id).await.unwrap();
    let failed = fx.engine.ledger().mark_failed(tx.id, "late failure").await.unwrap();

    assert_eq!(again.status, TransactionStatus::Completed);
    assert_eq!(failed.status, TransactionStatus::Completed);
    assert_eq!(fx.engine.wallet(&user).await.unwrap().balance.value(), dec!(100));
}

#[tokio::test]
async fn test_interrupted_settlement_resumes_pending_transaction() {
    let fx = common::fixture();
    let user: UserId = "ivan".into();

    // A worker recorded the transaction, then died before applying it.
    let inserted = fx
        .engine
        .ledger()
        .record_pending(NewTransaction {
            user_id: user.clone(),
            plan_id: Some("tokens-100".into()),
            amount: dec!(100),
            currency: "usd".to_string(),
            transaction_type: TransactionType::WalletRecharge,
            flow: Flow::Credit,
            gateway: PaymentGateway::Stripe,
            metadata: TransactionMetadata {
                external_key: Some("evt_resume".to_string()),
                ..TransactionMetadata::default()
            },
        })
        .await
        .unwrap();
    let Inserted::Created(pending) = inserted else {
        panic!("expected a new transaction");
    };

    let ack = fx.engine.settle_event(common::recharge("evt_resume", "ivan")).await.unwrap();
    let WebhookOutcome::Settled(tx) = ack.outcome else {
        panic!("expected settlement");
    };

    assert_eq!(tx.id, pending.id);
    assert_eq!(tx.status, TransactionStatus::Completed);
    let history = fx.engine.transactions(&user).try_collect().await.unwrap();
    assert_eq!(history.len(), 1);
    common::assert_ledger_matches_wallet(&fx.engine, &user).await;
}

#[tokio::test]
async fn test_delivery_waiting_on_live_claim_is_retryable() {
    let fx = common::fixture();
    fx.engine.claims().try_claim("stripe:evt_busy").await.unwrap();

    let err = fx
        .engine
        .settle_event(common::recharge("evt_busy", "judy"))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(fx.engine.wallet(&"judy".into()).await.is_err());
}

#[tokio::test]
async fn test_subscription_checkout_activates_plan() {
    let fx = common::fixture();
    let mut event = common::recharge("evt_sub", "kim");
    if let wallet_ledger::domain::gateway::GatewayEventKind::CheckoutSessionCompleted(session) =
        &mut event.kind
    {
        *session = common::checkout_session("kim", "pro", "subscription", 1900);
    }

    let ack = fx.engine.settle_event(event).await.unwrap();
    let WebhookOutcome::Settled(tx) = ack.outcome else {
        panic!("expected settlement");
    };

    let activations = fx.activator.activations().await;
    assert_eq!(activations.len(), 1);
    assert_eq!(activations[0].evidence, tx.id);
    assert_eq!(activations[0].user_id, UserId::from("kim"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_workload_keeps_ledger_and_wallets_in_step() {
    let fx = common::fixture();
    let users: Vec<UserId> = (0..4).map(|i| UserId(format!("user-{i}"))).collect();
    for user in &users {
        fx.engine.credit(user, credit(dec!(50))).await.unwrap();
    }

    let mut handles = Vec::new();
    for worker in 0..8u64 {
        let engine = fx.engine.clone();
        let users = users.clone();
        handles.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(worker);
            for step in 0..40 {
                let user = &users[rng.gen_range(0..users.len())];
                match rng.gen_range(0..3) {
                    0 => {
                        // Event ids collide across workers on purpose.
                        let event_id = format!("evt_{}_{}", user, rng.gen_range(0..10));
                        engine
                            .settle_event(common::recharge(&event_id, &user.0))
                            .await
                            .unwrap();
                    }
                    1 => {
                        let amount = Decimal::from(rng.gen_range(1..=120i64));
                        match engine.debit(user, debit(amount)).await {
                            Ok(_) | Err(WalletError::InsufficientBalance { .. }) => {}
                            Err(e) => panic!("step {step}: {e}"),
                        }
                    }
                    _ => {
                        let reference = format!("order-{}", rng.gen_range(0..10));
                        let request = DebitRequest {
                            reference: Some(reference),
                            ..debit(Decimal::from(rng.gen_range(1..=30i64)))
                        };
                        match engine.debit(user, request).await {
                            Ok(_)
                            | Err(WalletError::InsufficientBalance { .. })
                            | Err(WalletError::Validation(_)) => {}
                            Err(e) => panic!("step {step}: {e}"),
                        }
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for user in &users {
        common::assert_ledger_matches_wallet(&fx.engine, user).await;
        assert!(fx.engine.wallet(user).await.unwrap().balance.value() >= Decimal::ZERO);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_credits_open_one_wallet() {
    let fx = common::fixture();
    let user: UserId = "nina".into();

    let mut handles = Vec::new();
    for i in 1..=12i64 {
        let engine = fx.engine.clone();
        let user = user.clone();
        handles.push(tokio::spawn(async move {
            engine.credit(&user, credit(Decimal::from(i))).await
        }));
    }

    let mut opened = Vec::new();
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(receipt) => opened.push(receipt),
            Err(WalletError::Validation(_)) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(opened.len(), 1);
    assert_eq!(rejected, 11);

    let wallet = fx.engine.wallet(&user).await.unwrap();
    assert_eq!(wallet.balance.value(), opened[0].transaction.amount.value());
    let history = fx.engine.transactions(&user).try_collect().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, TransactionStatus::Completed);
    common::assert_ledger_matches_wallet(&fx.engine, &user).await;
}

#[tokio::test]
async fn test_subscription_cannot_be_credited_as_tokens() {
    let fx = common::fixture();
    let user: UserId = "kim".into();
    fx.engine.credit(&user, credit(dec!(5))).await.unwrap();

    let mut event = common::recharge("evt_sub_credit", "kim");
    if let wallet_ledger::domain::gateway::GatewayEventKind::CheckoutSessionCompleted(session) =
        &mut event.kind
    {
        *session = common::checkout_session("kim", "pro", "subscription", 1900);
    }
    let ack = fx.engine.settle_event(event).await.unwrap();
    let WebhookOutcome::Settled(subscription) = ack.outcome else {
        panic!("expected settlement");
    };

    let request = CreditRequest {
        amount: subscription.amount.value(),
        currency: subscription.currency.clone(),
        transaction_id: Some(subscription.id),
    };
    let err = fx.engine.credit(&user, request).await.unwrap_err();

    assert!(matches!(err, WalletError::Validation(_)));
    assert_eq!(fx.engine.wallet(&user).await.unwrap().balance.value(), dec!(5));
    common::assert_ledger_matches_wallet(&fx.engine, &user).await;
}
