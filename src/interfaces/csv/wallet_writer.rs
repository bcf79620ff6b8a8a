use crate::domain::wallet::Wallet;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct WalletRow<'a> {
    user: &'a str,
    balance: Decimal,
    transactions: usize,
}

/// Writes the final wallet report as `user,balance,transactions`, sorted by user.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_wallets(&mut self, mut wallets: Vec<Wallet>) -> Result<()> {
        wallets.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        if wallets.is_empty() {
            self.writer.write_record(["user", "balance", "transactions"])?;
        }
        for wallet in &wallets {
            self.writer.serialize(WalletRow {
                user: &wallet.user_id.0,
                balance: wallet.balance.value().normalize(),
                transactions: wallet.transactions.len(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
