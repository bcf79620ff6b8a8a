use crate::domain::plan::Plan;
use crate::error::{Result, WalletError};
use std::io::Read;

/// Reads the plan catalog from CSV:
/// `id, name, type, tokens, price, currency, validity_period, is_active`.
pub struct PlanReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> PlanReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn plans(self) -> impl Iterator<Item = Result<Plan>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(WalletError::from))
    }
}
