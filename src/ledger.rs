// ledger.rs
// Balance arithmetic shared by balance lookups, statements and voucher validation.
// Everything here is pure: callers fetch the numbers, these functions combine them.

use chrono::NaiveDate;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::models::{BalanceType, FiscalOpening, LedgerEntry, VoucherKind};

/// Amounts closer than this are treated as equal.
pub const AMOUNT_EPSILON: f64 = 0.005;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Balance {
    pub amount: f64,
    pub balance_type: BalanceType,
}

impl Balance {
    pub const ZERO: Balance = Balance {
        amount: 0.0,
        balance_type: BalanceType::Dr,
    };

    /// Debit-positive signed amount to a Dr/Cr balance. Zero reads as Dr.
    pub fn from_signed(signed: f64) -> Self {
        let signed = round2(signed);
        if signed < 0.0 {
            Balance {
                amount: -signed,
                balance_type: BalanceType::Cr,
            }
        } else {
            Balance {
                amount: signed,
                balance_type: BalanceType::Dr,
            }
        }
    }

    pub fn signed(&self) -> f64 {
        match self.balance_type {
            BalanceType::Dr => self.amount,
            BalanceType::Cr => -self.amount,
        }
    }
}

impl From<&FiscalOpening> for Balance {
    fn from(opening: &FiscalOpening) -> Self {
        Balance {
            amount: opening.amount,
            balance_type: opening.balance_type,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostingSide {
    Dr,
    Cr,
}

/// Balance the account would show once a pending amount on `side` is posted.
pub fn project_balance(current: Balance, pending: f64, side: PostingSide) -> Balance {
    let delta = match side {
        PostingSide::Dr => pending,
        PostingSide::Cr => -pending,
    };
    Balance::from_signed(current.signed() + delta)
}

/// Opening balance plus the net of every posting.
pub fn closing_balance<'a>(
    opening: Balance,
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> Balance {
    let net: f64 = entries.into_iter().map(|e| e.debit - e.credit).sum();
    Balance::from_signed(opening.signed() + net)
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementRow {
    pub date: NaiveDate,
    pub voucher_kind: VoucherKind,
    pub voucher_id: ObjectId,
    pub bill_number: String,
    pub narration: Option<String>,
    pub debit: f64,
    pub credit: f64,
    pub balance: Balance,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub opening: Balance,
    pub rows: Vec<StatementRow>,
    pub total_debit: f64,
    pub total_credit: f64,
    pub closing: Balance,
}

/// Orders entries by date (stable, so same-day postings keep insertion order) and
/// attaches the running balance to each row.
pub fn running_balance(opening: Balance, mut entries: Vec<LedgerEntry>) -> Statement {
    entries.sort_by_key(|e| e.date);
    let mut running = opening.signed();
    let mut total_debit = 0.0;
    let mut total_credit = 0.0;
    let rows = entries
        .into_iter()
        .map(|e| {
            running += e.debit - e.credit;
            total_debit += e.debit;
            total_credit += e.credit;
            StatementRow {
                date: e.date,
                voucher_kind: e.voucher_kind,
                voucher_id: e.voucher_id,
                bill_number: e.bill_number,
                narration: e.narration,
                debit: e.debit,
                credit: e.credit,
                balance: Balance::from_signed(running),
            }
        })
        .collect();
    Statement {
        opening,
        rows,
        total_debit: round2(total_debit),
        total_credit: round2(total_credit),
        closing: Balance::from_signed(running),
    }
}

/// Journal-style vouchers need both sides, positive amounts, and equal totals.
pub fn ensure_balanced(debits: &[f64], credits: &[f64]) -> Result<f64, String> {
    if debits.is_empty() || credits.is_empty() {
        return Err("voucher needs at least one debit and one credit line".to_string());
    }
    if debits
        .iter()
        .chain(credits)
        .any(|a| !a.is_finite() || round2(*a) <= 0.0)
    {
        return Err("voucher amounts must be positive".to_string());
    }
    // Lines are posted rounded, so the totals are compared the same way.
    let total_debit: f64 = debits.iter().map(|a| round2(*a)).sum();
    let total_credit: f64 = credits.iter().map(|a| round2(*a)).sum();
    if (total_debit - total_credit).abs() > AMOUNT_EPSILON {
        return Err(format!(
            "debit total {:.2} does not match credit total {:.2}",
            total_debit, total_credit
        ));
    }
    Ok(round2(total_debit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(date: &str, debit: f64, credit: f64) -> LedgerEntry {
        LedgerEntry {
            id: None,
            company_id: ObjectId::new(),
            fiscal_year_id: ObjectId::new(),
            account_id: ObjectId::new(),
            voucher_kind: VoucherKind::Journal,
            voucher_id: ObjectId::new(),
            bill_number: "JV-0001".into(),
            date: date.parse().unwrap(),
            debit,
            credit,
            narration: None,
        }
    }

    #[test]
    fn projection_moves_debit_balance_across_zero() {
        let current = Balance {
            amount: 500.0,
            balance_type: BalanceType::Dr,
        };
        let projected = project_balance(current, 800.0, PostingSide::Cr);
        assert_eq!(projected.balance_type, BalanceType::Cr);
        assert_eq!(projected.amount, 300.0);

        let projected = project_balance(current, 250.0, PostingSide::Dr);
        assert_eq!(projected.balance_type, BalanceType::Dr);
        assert_eq!(projected.amount, 750.0);
    }

    #[test]
    fn projection_on_credit_balance() {
        let current = Balance {
            amount: 1200.0,
            balance_type: BalanceType::Cr,
        };
        let projected = project_balance(current, 200.0, PostingSide::Cr);
        assert_eq!(projected.amount, 1400.0);
        assert_eq!(projected.balance_type, BalanceType::Cr);

        let settled = project_balance(current, 1200.0, PostingSide::Dr);
        assert_eq!(settled, Balance::ZERO);
    }

    #[test]
    fn statement_keeps_running_total_in_date_order() {
        let opening = Balance {
            amount: 100.0,
            balance_type: BalanceType::Dr,
        };
        let entries = vec![
            entry("2025-02-10", 0.0, 300.0),
            entry("2025-01-05", 50.0, 0.0),
        ];
        let statement = running_balance(opening, entries);
        assert_eq!(statement.rows.len(), 2);
        assert_eq!(statement.rows[0].balance.amount, 150.0);
        assert_eq!(statement.rows[1].balance.balance_type, BalanceType::Cr);
        assert_eq!(statement.rows[1].balance.amount, 150.0);
        assert_eq!(statement.total_debit, 50.0);
        assert_eq!(statement.total_credit, 300.0);
        assert_eq!(statement.closing.signed(), -150.0);
    }

    #[test]
    fn closing_balance_sums_entries() {
        let entries = [entry("2025-01-01", 10.0, 0.0), entry("2025-01-02", 0.0, 2.5)];
        let closing = closing_balance(Balance::ZERO, entries.iter());
        assert_eq!(closing.amount, 7.5);
        assert_eq!(closing.balance_type, BalanceType::Dr);
    }

    #[test]
    fn balanced_voucher_checks() {
        assert_eq!(ensure_balanced(&[100.0, 50.0], &[150.0]), Ok(150.0));
        assert!(ensure_balanced(&[100.0], &[99.0]).is_err());
        assert!(ensure_balanced(&[], &[10.0]).is_err());
        assert!(ensure_balanced(&[0.0], &[0.0]).is_err());
        assert!(ensure_balanced(&[10.001], &[10.0]).is_ok());
        assert!(ensure_balanced(&[0.004], &[0.004]).is_err());
    }

    #[test]
    fn balance_check_uses_rounded_lines() {
        // Raw lines sum to 100 but post as 33.34 + 33.34 + 33.33.
        assert!(ensure_balanced(&[33.336, 33.336, 33.328], &[100.0]).is_err());
        assert_eq!(ensure_balanced(&[33.33, 33.33, 33.34], &[100.0]), Ok(100.0));
    }
}
