// batches.rs
// Batch keys and the available-vs-requested check run before any stock leaves a batch.

use std::collections::HashMap;

use chrono::NaiveDate;
use mongodb::bson::oid::ObjectId;
use serde::Serialize;

use crate::models::Item;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BatchKey {
    pub item_id: ObjectId,
    pub batch_number: String,
    pub expiry_date: Option<NaiveDate>,
}

impl BatchKey {
    pub fn new(item_id: ObjectId, batch_number: &str, expiry_date: Option<NaiveDate>) -> Self {
        Self {
            item_id,
            batch_number: batch_number.trim().to_string(),
            expiry_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shortage {
    pub key: BatchKey,
    pub available: f64,
    pub requested: f64,
}

/// Quantity on hand per batch across the given items.
pub fn available_batches<'a>(items: impl IntoIterator<Item = &'a Item>) -> HashMap<BatchKey, f64> {
    let mut map = HashMap::new();
    for item in items {
        let Some(item_id) = item.id else { continue };
        for entry in &item.stock_entries {
            *map.entry(BatchKey::new(item_id, &entry.batch_number, entry.expiry_date))
                .or_insert(0.0) += entry.quantity;
        }
    }
    map
}

/// Sums requested quantity per batch (the same batch may appear on several lines) and
/// reports every batch asked for beyond what is on hand. Unknown batches count as zero.
pub fn check_allocation(
    available: &HashMap<BatchKey, f64>,
    requested: &[(BatchKey, f64)],
) -> Vec<Shortage> {
    let mut used: Vec<(BatchKey, f64)> = Vec::new();
    for (key, qty) in requested {
        match used.iter_mut().find(|(k, _)| k == key) {
            Some((_, total)) => *total += qty,
            None => used.push((key.clone(), *qty)),
        }
    }

    used.into_iter()
        .filter_map(|(key, requested)| {
            let on_hand = available.get(&key).copied().unwrap_or(0.0);
            (requested > on_hand + f64::EPSILON).then_some(Shortage {
                key,
                available: on_hand,
                requested,
            })
        })
        .collect()
}

pub fn describe_shortages(shortages: &[Shortage], names: &HashMap<ObjectId, String>) -> String {
    shortages
        .iter()
        .map(|s| {
            let name = names
                .get(&s.key.item_id)
                .cloned()
                .unwrap_or_else(|| s.key.item_id.to_hex());
            format!(
                "{name} batch {} has {} available, {} requested",
                s.key.batch_number, s.available, s.requested
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StockEntry;

    fn stock(batch: &str, qty: f64) -> StockEntry {
        StockEntry {
            batch_number: batch.into(),
            expiry_date: Some(NaiveDate::from_ymd_opt(2027, 6, 30).unwrap()),
            quantity: qty,
            price: 12.0,
            pu_price: 10.0,
            mrp: 13.0,
            store_id: None,
            rack_id: None,
            purchase_bill_id: None,
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        }
    }

    fn item(entries: Vec<StockEntry>) -> Item {
        Item {
            id: Some(ObjectId::new()),
            company_id: ObjectId::new(),
            name: "Paracetamol 500mg".into(),
            hscode: None,
            category_id: None,
            items_company_id: None,
            unit_id: None,
            main_unit_id: None,
            ws_unit: None,
            vat_status: Default::default(),
            price: 12.0,
            pu_price: 10.0,
            reorder_level: 0.0,
            store_id: None,
            rack_id: None,
            stock_entries: entries,
            fiscal_year_id: ObjectId::new(),
            created_at: None,
            updated_at: None,
        }
    }

    fn expiry() -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2027, 6, 30)
    }

    #[test]
    fn lines_on_same_batch_are_summed() {
        let it = item(vec![stock("B1", 10.0), stock("B2", 4.0)]);
        let id = it.id.unwrap();
        let available = available_batches([&it]);
        let requested = vec![
            (BatchKey::new(id, "B1", expiry()), 6.0),
            (BatchKey::new(id, "B1", expiry()), 5.0),
            (BatchKey::new(id, "B2", expiry()), 4.0),
        ];
        let shortages = check_allocation(&available, &requested);
        assert_eq!(shortages.len(), 1);
        assert_eq!(shortages[0].key.batch_number, "B1");
        assert_eq!(shortages[0].requested, 11.0);
        assert_eq!(shortages[0].available, 10.0);
    }

    #[test]
    fn unknown_batch_is_a_shortage() {
        let it = item(vec![stock("B1", 10.0)]);
        let id = it.id.unwrap();
        let available = available_batches([&it]);
        let shortages = check_allocation(&available, &[(BatchKey::new(id, "ZZ", None), 1.0)]);
        assert_eq!(shortages.len(), 1);
        assert_eq!(shortages[0].available, 0.0);
    }

    #[test]
    fn exact_allocation_passes() {
        let it = item(vec![stock("B1", 3.0), stock("B1", 2.0)]);
        let id = it.id.unwrap();
        let available = available_batches([&it]);
        assert_eq!(available[&BatchKey::new(id, "B1", expiry())], 5.0);
        assert!(check_allocation(&available, &[(BatchKey::new(id, " B1 ", expiry()), 5.0)]).is_empty());
    }
}
