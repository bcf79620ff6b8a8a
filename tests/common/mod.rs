#![allow(dead_code)]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wallet_ledger::application::engine::{EngineParts, SettlementEngine};
use wallet_ledger::config::SettlementConfig;
use wallet_ledger::domain::gateway::{
    CheckoutSession, GatewayEvent, GatewayEventKind, SessionMetadata,
};
use wallet_ledger::domain::plan::{Plan, PlanType};
use wallet_ledger::domain::transaction::{TransactionStatus, TransactionType, UserId};
use wallet_ledger::infrastructure::in_memory::{
    InMemoryCheckoutSessions, InMemoryClaimStore, InMemoryPlanCatalog, InMemoryTransactionStore,
    InMemoryWalletStore, RecordingSubscriptionActivator,
};
use wallet_ledger::infrastructure::signature::HmacWebhookVerifier;

pub const WEBHOOK_SECRET: &str = "whsec_integration";

pub fn plan(id: &str, plan_type: PlanType, tokens: Decimal, price: Decimal) -> Plan {
    Plan {
        id: id.into(),
        name: id.to_string(),
        plan_type,
        tokens,
        price,
        currency: "usd".to_string(),
        validity_period: None,
        is_active: true,
    }
}

pub fn catalog() -> Vec<Plan> {
    vec![
        plan("tokens-100", PlanType::WalletRecharge, dec!(100), dec!(9.99)),
        plan("tokens-500", PlanType::WalletRecharge, dec!(500), dec!(39.00)),
        plan("pro", PlanType::Subscription, dec!(0), dec!(19.00)),
    ]
}

pub struct Fixture {
    pub engine: Arc<SettlementEngine>,
    pub sessions: InMemoryCheckoutSessions,
    pub activator: RecordingSubscriptionActivator,
    pub verifier: HmacWebhookVerifier,
}

pub fn fixture() -> Fixture {
    let sessions = InMemoryCheckoutSessions::new();
    let activator = RecordingSubscriptionActivator::new();
    let engine = SettlementEngine::new(
        EngineParts {
            transactions: Box::new(InMemoryTransactionStore::new()),
            wallets: Box::new(InMemoryWalletStore::new()),
            claims: Box::new(InMemoryClaimStore::new()),
            plans: Box::new(InMemoryPlanCatalog::with_plans(catalog())),
            verifier: Some(Box::new(verifier())),
            sessions: Box::new(sessions.clone()),
            subscriptions: Box::new(activator.clone()),
        },
        SettlementConfig::default().with_claim_polling(Duration::from_millis(5), 400),
    );
    Fixture {
        engine: Arc::new(engine),
        sessions,
        activator,
        verifier: verifier(),
    }
}

pub fn verifier() -> HmacWebhookVerifier {
    HmacWebhookVerifier::new(WEBHOOK_SECRET, Duration::from_secs(300))
}

pub fn checkout_session(user: &str, plan_id: &str, plan_type: &str, minor: i64) -> CheckoutSession {
    CheckoutSession {
        id: format!("cs_{user}_{plan_id}"),
        status: Some("complete".to_string()),
        payment_status: Some("paid".to_string()),
        amount_total: Some(minor),
        currency: Some("usd".to_string()),
        metadata: SessionMetadata(
            [("userId", user), ("planId", plan_id), ("type", plan_type)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
    }
}

pub fn recharge(event_id: &str, user: &str) -> GatewayEvent {
    GatewayEvent {
        id: event_id.to_string(),
        kind: GatewayEventKind::CheckoutSessionCompleted(checkout_session(
            user,
            "tokens-100",
            "wallet-recharge",
            999,
        )),
    }
}

/// Signed webhook body and header for a recharge event.
pub fn signed_recharge(verifier: &HmacWebhookVerifier, event_id: &str, user: &str) -> (String, String) {
    let body = serde_json::json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": checkout_session(user, "tokens-100", "wallet-recharge", 999) }
    })
    .to_string();
    let header = verifier
        .sign(body.as_bytes(), chrono::Utc::now().timestamp())
        .unwrap();
    (body, header)
}

/// Checks that the wallet equals the signed sum of the user's completed
/// wallet-affecting transactions, and links exactly those.
pub async fn assert_ledger_matches_wallet(engine: &SettlementEngine, user: &UserId) {
    let wallet = engine.wallet(user).await.unwrap();
    let history = engine.transactions(user).try_collect().await.unwrap();
    let applied: Vec<_> = history
        .iter()
        .filter(|tx| tx.status == TransactionStatus::Completed)
        .filter(|tx| {
            matches!(
                tx.transaction_type,
                TransactionType::WalletRecharge | TransactionType::Debit
            )
        })
        .collect();

    let expected: Decimal = applied.iter().map(|tx| tx.signed_amount()).sum();
    assert_eq!(wallet.balance.value(), expected, "ledger and wallet diverged for {user}");
    assert_eq!(wallet.transactions.len(), applied.len());
    for tx in applied {
        assert!(wallet.contains(tx.id), "{} missing from wallet", tx.id);
    }
}

pub fn write_plans_csv(path: &Path) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(["id", "name", "type", "tokens", "price", "currency", "validity_period", "is_active"])?;
    wtr.write_record(["tokens-100", "Starter", "wallet-recharge", "100", "9.99", "usd", "", "true"])?;
    wtr.write_record(["pro", "Pro", "subscription", "0", "19", "usd", "30", "true"])?;
    wtr.write_record(["retired", "Old", "wallet-recharge", "10", "1", "usd", "", "false"])?;
    wtr.flush()?;
    Ok(())
}

/// One initial credit per user, then `rows` debits of 1 spread over `users`.
pub fn generate_commands_csv(path: &Path, users: usize, rows: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(["kind", "user", "amount", "currency", "plan", "event", "reference"])?;

    for u in 1..=users {
        wtr.write_record(["credit", &format!("user-{u}"), "1000000", "INR", "", "", ""])?;
    }
    for i in 0..rows {
        let user = format!("user-{}", i % users + 1);
        wtr.write_record(["debit", &user, "1", "INR", "", "", &format!("ref-{i}")])?;
    }

    wtr.flush()?;
    Ok(())
}
