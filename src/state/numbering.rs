use anyhow::{Context, Result};
use mongodb::{
    bson::{doc, oid::ObjectId, to_bson},
    options::ReturnDocument,
};

use crate::models::VoucherKind;

use super::AppState;

/// `SB-0001`, `PV-0042`, ... Numbers wider than four digits are kept whole.
pub fn format_bill_number(kind: VoucherKind, sequence: i64) -> String {
    format!("{}-{:04}", kind.prefix(), sequence)
}

fn counter_filter(
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
    kind: VoucherKind,
) -> Result<mongodb::bson::Document> {
    Ok(doc! {
        "company_id": company_id,
        "fiscal_year_id": fiscal_year_id,
        "kind": to_bson(&kind)?,
    })
}

/// The number the next document of this kind would get. Nothing is reserved, so
/// two clients previewing at once see the same number.
pub async fn next_bill_number(
    state: &AppState,
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
    kind: VoucherKind,
) -> Result<(String, i64)> {
    let current = state
        .counters
        .find_one(counter_filter(company_id, fiscal_year_id, kind)?)
        .await?
        .map(|c| c.seq)
        .unwrap_or(0);
    let sequence = current + 1;
    Ok((format_bill_number(kind, sequence), sequence))
}

/// Reserves the next number with a single upserting `$inc`, so concurrent
/// creates never share a number. Numbers freed by deletes are not reused.
pub async fn allocate_bill_number(
    state: &AppState,
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
    kind: VoucherKind,
) -> Result<(String, i64)> {
    let counter = state
        .counters
        .find_one_and_update(
            counter_filter(company_id, fiscal_year_id, kind)?,
            doc! { "$inc": { "seq": 1_i64 } },
        )
        .upsert(true)
        .return_document(ReturnDocument::After)
        .await?
        .context("counter upsert returned nothing")?;
    Ok((format_bill_number(kind, counter.seq), counter.seq))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_prefixed_and_padded() {
        assert_eq!(format_bill_number(VoucherKind::Sales, 1), "SB-0001");
        assert_eq!(format_bill_number(VoucherKind::Payment, 42), "PV-0042");
        assert_eq!(format_bill_number(VoucherKind::StockAdjustment, 12345), "SA-12345");
    }
}
