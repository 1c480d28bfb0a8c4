use anyhow::{Context, Result};
use chrono::NaiveDate;
use mongodb::bson::{doc, oid::ObjectId};
use tracing::error;

use crate::ledger::{AMOUNT_EPSILON, round2};
use crate::models::{Bill, CashVoucher, JournalDocument, LedgerEntry, PaymentMode, VoucherKind};

use super::{AppState, accounts::default_account, seed};

/// Voucher header shared by every posting it produces.
struct Header<'a> {
    company_id: ObjectId,
    fiscal_year_id: ObjectId,
    kind: VoucherKind,
    voucher_id: ObjectId,
    bill_number: &'a str,
    date: NaiveDate,
    narration: Option<&'a str>,
}

impl Header<'_> {
    fn debit(&self, account_id: ObjectId, amount: f64) -> LedgerEntry {
        self.entry(account_id, amount, 0.0)
    }

    fn credit(&self, account_id: ObjectId, amount: f64) -> LedgerEntry {
        self.entry(account_id, 0.0, amount)
    }

    fn entry(&self, account_id: ObjectId, debit: f64, credit: f64) -> LedgerEntry {
        LedgerEntry {
            id: None,
            company_id: self.company_id,
            fiscal_year_id: self.fiscal_year_id,
            account_id,
            voucher_kind: self.kind,
            voucher_id: self.voucher_id,
            bill_number: self.bill_number.to_string(),
            date: self.date,
            debit: round2(debit),
            credit: round2(credit),
            narration: self.narration.map(str::to_string),
        }
    }
}

fn non_zero(entries: Vec<LedgerEntry>) -> Vec<LedgerEntry> {
    entries
        .into_iter()
        .filter(|e| e.debit.abs() > AMOUNT_EPSILON || e.credit.abs() > AMOUNT_EPSILON)
        .collect()
}

/// The account a bill settles against: the party on credit, the cash account otherwise.
fn settlement_account(bill: &Bill) -> Result<ObjectId> {
    match bill.payment_mode {
        PaymentMode::Credit => bill
            .party_account_id
            .context("credit bill without a party account"),
        PaymentMode::Cash => bill
            .cash_account_id
            .or(bill.party_account_id)
            .context("cash bill without a cash account"),
    }
}

/// Postings for a bill. Round-off stays inside the sales/purchase leg so the entry balances.
pub async fn bill_postings(state: &AppState, bill: &Bill) -> Result<Vec<LedgerEntry>> {
    let voucher_id = bill.id.context("bill missing _id")?;
    let header = Header {
        company_id: bill.company_id,
        fiscal_year_id: bill.fiscal_year_id,
        kind: bill.kind,
        voucher_id,
        bill_number: &bill.bill_number,
        date: bill.date,
        narration: bill.narration.as_deref(),
    };
    let total = bill.total_amount;
    let vat = bill.vat_amount;
    let net = round2(total - vat);
    let company = &bill.company_id;

    let entries = match bill.kind {
        VoucherKind::Sales => {
            let sales = default_account(state, company, seed::SALES_ACCOUNT).await?;
            let vat_account = default_account(state, company, seed::VAT_ACCOUNT).await?;
            vec![
                header.debit(settlement_account(bill)?, total),
                header.credit(sales, net),
                header.credit(vat_account, vat),
            ]
        }
        VoucherKind::SalesReturn => {
            let returns = default_account(state, company, seed::SALES_RETURN_ACCOUNT).await?;
            let vat_account = default_account(state, company, seed::VAT_ACCOUNT).await?;
            vec![
                header.debit(returns, net),
                header.debit(vat_account, vat),
                header.credit(settlement_account(bill)?, total),
            ]
        }
        VoucherKind::Purchase => {
            let purchase = default_account(state, company, seed::PURCHASE_ACCOUNT).await?;
            let vat_account = default_account(state, company, seed::VAT_ACCOUNT).await?;
            vec![
                header.debit(purchase, net),
                header.debit(vat_account, vat),
                header.credit(settlement_account(bill)?, total),
            ]
        }
        VoucherKind::PurchaseReturn => {
            let returns = default_account(state, company, seed::PURCHASE_RETURN_ACCOUNT).await?;
            let vat_account = default_account(state, company, seed::VAT_ACCOUNT).await?;
            vec![
                header.debit(settlement_account(bill)?, total),
                header.credit(returns, net),
                header.credit(vat_account, vat),
            ]
        }
        _ => Vec::new(),
    };
    Ok(non_zero(entries))
}

pub fn cash_voucher_postings(voucher: &CashVoucher) -> Result<Vec<LedgerEntry>> {
    let header = Header {
        company_id: voucher.company_id,
        fiscal_year_id: voucher.fiscal_year_id,
        kind: voucher.kind,
        voucher_id: voucher.id.context("voucher missing _id")?,
        bill_number: &voucher.bill_number,
        date: voucher.date,
        narration: voucher.narration.as_deref(),
    };
    let entries = match voucher.kind {
        VoucherKind::Payment => vec![
            header.debit(voucher.account_id, voucher.amount),
            header.credit(voucher.cash_account_id, voucher.amount),
        ],
        VoucherKind::Receipt => vec![
            header.debit(voucher.cash_account_id, voucher.amount),
            header.credit(voucher.account_id, voucher.amount),
        ],
        _ => Vec::new(),
    };
    Ok(non_zero(entries))
}

pub fn journal_postings(journal: &JournalDocument) -> Result<Vec<LedgerEntry>> {
    let header = Header {
        company_id: journal.company_id,
        fiscal_year_id: journal.fiscal_year_id,
        kind: journal.kind,
        voucher_id: journal.id.context("journal missing _id")?,
        bill_number: &journal.bill_number,
        date: journal.date,
        narration: journal.description.as_deref(),
    };
    let entries = journal
        .debit_lines
        .iter()
        .map(|l| header.debit(l.account_id, l.amount))
        .chain(
            journal
                .credit_lines
                .iter()
                .map(|l| header.credit(l.account_id, l.amount)),
        )
        .collect();
    Ok(non_zero(entries))
}

/// Writes `entries` for the voucher, then drops what it posted before. Either step
/// failing removes the new rows again, so the voucher keeps its earlier postings.
pub async fn replace_postings(
    state: &AppState,
    voucher_id: &ObjectId,
    mut entries: Vec<LedgerEntry>,
) -> Result<()> {
    let ids: Vec<ObjectId> = entries
        .iter_mut()
        .map(|e| *e.id.get_or_insert_with(ObjectId::new))
        .collect();
    if !entries.is_empty() {
        if let Err(err) = state.ledger_entries.insert_many(entries).await {
            discard_entries(state, voucher_id, &ids).await;
            return Err(err.into());
        }
    }
    if let Err(err) = state
        .ledger_entries
        .delete_many(doc! { "voucher_id": voucher_id, "_id": { "$nin": &ids } })
        .await
    {
        discard_entries(state, voucher_id, &ids).await;
        return Err(err.into());
    }
    Ok(())
}

async fn discard_entries(state: &AppState, voucher_id: &ObjectId, ids: &[ObjectId]) {
    if ids.is_empty() {
        return;
    }
    if let Err(err) = state
        .ledger_entries
        .delete_many(doc! { "_id": { "$in": ids } })
        .await
    {
        error!(voucher_id = %voucher_id, error = ?err, "failed to discard new postings");
    }
}

pub async fn delete_postings(state: &AppState, voucher_id: &ObjectId) -> Result<u64> {
    let res = state
        .ledger_entries
        .delete_many(doc! { "voucher_id": voucher_id })
        .await?;
    Ok(res.deleted_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AmountLine, Instrument};

    fn sums(entries: &[LedgerEntry]) -> (f64, f64) {
        entries
            .iter()
            .fold((0.0, 0.0), |(d, c), e| (d + e.debit, c + e.credit))
    }

    #[test]
    fn payment_debits_the_party_and_credits_cash() {
        let party = ObjectId::new();
        let cash = ObjectId::new();
        let voucher = CashVoucher {
            id: Some(ObjectId::new()),
            company_id: ObjectId::new(),
            fiscal_year_id: ObjectId::new(),
            kind: VoucherKind::Payment,
            bill_number: "PV-0001".into(),
            sequence: 1,
            date: "2025-03-01".parse().unwrap(),
            account_id: party,
            cash_account_id: cash,
            amount: 250.0,
            instrument: Instrument::Cash,
            cheque_number: None,
            narration: None,
            created_by: None,
            created_at: None,
            updated_at: None,
        };
        let entries = cash_voucher_postings(&voucher).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].account_id, party);
        assert_eq!(entries[0].debit, 250.0);
        assert_eq!(entries[1].account_id, cash);
        assert_eq!(entries[1].credit, 250.0);

        let receipt = CashVoucher {
            kind: VoucherKind::Receipt,
            ..voucher
        };
        let entries = cash_voucher_postings(&receipt).unwrap();
        assert_eq!(entries[0].account_id, cash);
        assert_eq!(entries[1].account_id, party);
    }

    #[test]
    fn journal_lines_post_as_entered() {
        let journal = JournalDocument {
            id: Some(ObjectId::new()),
            company_id: ObjectId::new(),
            fiscal_year_id: ObjectId::new(),
            kind: VoucherKind::Journal,
            bill_number: "JV-0001".into(),
            sequence: 1,
            date: "2025-03-01".parse().unwrap(),
            debit_lines: vec![
                AmountLine { account_id: ObjectId::new(), amount: 60.0 },
                AmountLine { account_id: ObjectId::new(), amount: 40.0 },
            ],
            credit_lines: vec![AmountLine { account_id: ObjectId::new(), amount: 100.0 }],
            description: Some("accrual".into()),
            created_by: None,
            created_at: None,
            updated_at: None,
        };
        let entries = journal_postings(&journal).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(sums(&entries), (100.0, 100.0));
        assert!(entries.iter().all(|e| e.narration.as_deref() == Some("accrual")));
    }
}
