// billing.rs
// Line and document totals for sales/purchase bills, returns and quotations.

use serde::Serialize;

use crate::{
    ledger::round2,
    models::{BillLine, VatStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BillTotals {
    pub subtotal: f64,
    pub discount_amount: f64,
    pub taxable_amount: f64,
    pub non_taxable_amount: f64,
    pub vat_amount: f64,
    pub total_amount: f64,
}

impl BillTotals {
    /// Amount posted to the sales/purchase side, i.e. everything except VAT.
    pub fn net_of_vat(&self) -> f64 {
        round2(self.total_amount - self.vat_amount)
    }
}

/// Rate used for a line: purchase price for purchase-side documents, selling price otherwise.
pub fn line_rate(line: &BillLine, purchase_side: bool) -> f64 {
    if purchase_side { line.pu_price } else { line.price }
}

pub fn line_total(line: &BillLine, purchase_side: bool) -> f64 {
    let gross = line.quantity * line_rate(line, purchase_side);
    round2(gross - gross * line.discount_percentage / 100.0)
}

/// Document discount is spread proportionally over the taxable and exempt parts;
/// VAT applies to the discounted taxable part only. `round_off` is added last.
pub fn compute_totals(
    lines: &mut [BillLine],
    purchase_side: bool,
    discount_percentage: f64,
    vat_percentage: f64,
    round_off: f64,
) -> BillTotals {
    let mut taxable_gross = 0.0;
    let mut exempt_gross = 0.0;
    for line in lines.iter_mut() {
        line.line_total = line_total(line, purchase_side);
        match line.vat_status {
            VatStatus::Vatable => taxable_gross += line.line_total,
            VatStatus::VatExempt => exempt_gross += line.line_total,
        }
    }

    let factor = 1.0 - discount_percentage / 100.0;
    let subtotal = round2(taxable_gross + exempt_gross);
    let taxable_amount = round2(taxable_gross * factor);
    let non_taxable_amount = round2(exempt_gross * factor);
    let discount_amount = round2(subtotal - taxable_amount - non_taxable_amount);
    let vat_amount = round2(taxable_amount * vat_percentage / 100.0);
    let total_amount = round2(taxable_amount + non_taxable_amount + vat_amount + round_off);

    BillTotals {
        subtotal,
        discount_amount,
        taxable_amount,
        non_taxable_amount,
        vat_amount,
        total_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;

    fn line(qty: f64, price: f64, pu_price: f64, vat_status: VatStatus) -> BillLine {
        BillLine {
            item_id: ObjectId::new(),
            batch_number: "B1".into(),
            expiry_date: None,
            quantity: qty,
            bonus: 0.0,
            price,
            pu_price,
            mrp: price,
            discount_percentage: 0.0,
            vat_status,
            line_total: 0.0,
        }
    }

    #[test]
    fn sales_totals_split_taxable_and_exempt() {
        let mut lines = vec![
            line(10.0, 20.0, 15.0, VatStatus::Vatable),
            line(5.0, 40.0, 30.0, VatStatus::VatExempt),
        ];
        let totals = compute_totals(&mut lines, false, 10.0, 13.0, 0.0);
        assert_eq!(lines[0].line_total, 200.0);
        assert_eq!(totals.subtotal, 400.0);
        assert_eq!(totals.taxable_amount, 180.0);
        assert_eq!(totals.non_taxable_amount, 180.0);
        assert_eq!(totals.discount_amount, 40.0);
        assert_eq!(totals.vat_amount, 23.4);
        assert_eq!(totals.total_amount, 383.4);
        assert_eq!(totals.net_of_vat(), 360.0);
    }

    #[test]
    fn purchase_side_uses_purchase_price_and_line_discount() {
        let mut lines = vec![line(4.0, 20.0, 15.0, VatStatus::Vatable)];
        lines[0].discount_percentage = 50.0;
        let totals = compute_totals(&mut lines, true, 0.0, 0.0, -0.5);
        assert_eq!(lines[0].line_total, 30.0);
        assert_eq!(totals.total_amount, 29.5);
    }
}
