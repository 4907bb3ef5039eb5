use log::{info, warn};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Matched,
    Mismatch,
    /// No authoritative balance was available.
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub status: ReconciliationStatus,
    pub authoritative_balance: Option<Decimal>,
    /// Ledger balance minus authoritative balance.
    pub difference: Option<Decimal>,
}

impl Reconciliation {
    pub fn is_mismatch(&self) -> bool {
        self.status == ReconciliationStatus::Mismatch
    }
}

/// Compares the ledger balance with the chain's balance within a relative
/// `tolerance`.
pub fn reconcile(
    ledger_balance: Decimal,
    authoritative: Option<Decimal>,
    tolerance: Decimal,
) -> Reconciliation {
    let Some(actual) = authoritative else {
        info!("No authoritative balance; reconciliation skipped");
        return Reconciliation {
            status: ReconciliationStatus::Unverified,
            authoritative_balance: None,
            difference: None,
        };
    };

    let difference = ledger_balance - actual;
    let scale = ledger_balance.abs().max(actual.abs());
    let status = if difference.abs() <= scale * tolerance {
        ReconciliationStatus::Matched
    } else {
        warn!(
            "Ledger balance {} differs from on-chain balance {} by {}",
            ledger_balance, actual, difference
        );
        ReconciliationStatus::Mismatch
    };

    Reconciliation {
        status,
        authoritative_balance: Some(actual),
        difference: Some(difference),
    }
}
