use crate::application::engine::{CreditRequest, DebitRequest};
use crate::domain::gateway::{
    CheckoutSession, GatewayEvent, GatewayEventKind, SessionMetadata,
};
use crate::domain::plan::{PlanId, PlanType};
use crate::domain::transaction::{TransactionId, UserId};
use crate::error::{Result, WalletError};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum CommandKind {
    Checkout,
    Credit,
    Debit,
}

/// One row of the replay file: `kind, user, amount, currency, plan, event, reference`.
#[derive(Debug, Deserialize)]
struct CommandRecord {
    kind: CommandKind,
    user: String,
    amount: Option<Decimal>,
    currency: Option<String>,
    plan: Option<String>,
    event: Option<String>,
    reference: Option<String>,
}

/// A completed checkout as the gateway would report it.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutCommand {
    pub event_id: String,
    pub user_id: UserId,
    pub plan_id: PlanId,
    /// Amount paid, in major units.
    pub amount: Decimal,
    pub currency: String,
}

impl CheckoutCommand {
    /// Builds the `checkout.session.completed` event for this payment.
    pub fn into_event(self, plan_type: PlanType) -> Result<GatewayEvent> {
        let minor = (self.amount * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or_else(|| WalletError::Validation(format!("Amount {} is out of range", self.amount)))?;
        let metadata = SessionMetadata(
            [
                ("userId", self.user_id.0),
                ("planId", self.plan_id.0),
                ("type", plan_type.as_str().to_string()),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        );
        let session = CheckoutSession {
            id: format!("cs_{}", self.event_id),
            status: Some("complete".to_string()),
            payment_status: Some("paid".to_string()),
            amount_total: Some(minor),
            currency: Some(self.currency),
            metadata,
        };
        Ok(GatewayEvent {
            id: self.event_id,
            kind: GatewayEventKind::CheckoutSessionCompleted(session),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementCommand {
    Checkout(CheckoutCommand),
    Credit { user_id: UserId, request: CreditRequest },
    Debit { user_id: UserId, request: DebitRequest },
}

fn required<T>(value: Option<T>, field: &str, kind: CommandKind) -> Result<T> {
    value.ok_or_else(|| WalletError::Validation(format!("{kind:?} row is missing '{field}'")))
}

impl TryFrom<CommandRecord> for SettlementCommand {
    type Error = WalletError;

    fn try_from(record: CommandRecord) -> Result<Self> {
        let user_id = UserId(record.user);
        let kind = record.kind;
        match kind {
            CommandKind::Checkout => Ok(SettlementCommand::Checkout(CheckoutCommand {
                event_id: required(record.event, "event", kind)?,
                user_id,
                plan_id: PlanId(required(record.plan, "plan", kind)?),
                amount: required(record.amount, "amount", kind)?,
                currency: required(record.currency, "currency", kind)?,
            })),
            CommandKind::Credit => Ok(SettlementCommand::Credit {
                user_id,
                request: CreditRequest {
                    amount: required(record.amount, "amount", kind)?,
                    currency: required(record.currency, "currency", kind)?,
                    transaction_id: record
                        .reference
                        .map(|r| r.parse::<TransactionId>())
                        .transpose()?,
                },
            }),
            CommandKind::Debit => Ok(SettlementCommand::Debit {
                user_id,
                request: DebitRequest {
                    amount: required(record.amount, "amount", kind)?,
                    currency: required(record.currency, "currency", kind)?,
                    reference: record.reference,
                },
            }),
        }
    }
}

/// Reads settlement commands from a CSV source.
///
/// Fields are trimmed and trailing empty columns may be omitted.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily parses rows; a bad row yields an error without ending the stream.
    pub fn commands(self) -> impl Iterator<Item = Result<SettlementCommand>> {
        self.reader
            .into_deserialize::<CommandRecord>()
            .map(|row| SettlementCommand::try_from(row?))
    }
}
