use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use futures::stream::TryStreamExt;
use mongodb::bson::{Bson, doc, oid::ObjectId, to_bson};
use serde::Serialize;
use tracing::{error, warn};

use crate::batches::{BatchKey, available_batches, check_allocation, describe_shortages};
use crate::error::DomainError;
use crate::models::{Item, StockEntry};

use super::AppState;

/// Rounds of `$inc` then conditional `$push` before an inbound movement gives up.
const INBOUND_ATTEMPTS: usize = 3;

/// A change to one batch. Positive `delta` adds stock, negative removes it. `seed`
/// describes the batch to create when an addition targets a batch the item lacks.
#[derive(Debug, Clone)]
pub struct StockMovement {
    pub key: BatchKey,
    pub delta: f64,
    pub seed: Option<StockEntry>,
}

impl StockMovement {
    pub fn inbound(key: BatchKey, quantity: f64, seed: StockEntry) -> Self {
        Self {
            key,
            delta: quantity,
            seed: Some(seed),
        }
    }

    pub fn outbound(key: BatchKey, quantity: f64) -> Self {
        Self {
            key,
            delta: -quantity,
            seed: None,
        }
    }

    pub fn inverse(&self) -> Self {
        Self {
            key: self.key.clone(),
            delta: -self.delta,
            seed: self.seed.clone(),
        }
    }
}

/// Checks and applies a set of movements for one company.
///
/// Outbound quantities are first checked against what is on hand (counting inbound
/// movements in the same set, which is how an edited bill gets its old quantity back).
/// Each removal is then a conditional update that only matches while the batch still
/// holds enough, so two bills racing for the same batch cannot both take the last units.
/// If any step fails, the movements already applied are reverted.
pub async fn apply_movements(
    state: &AppState,
    company_id: &ObjectId,
    movements: &[StockMovement],
) -> Result<()> {
    if movements.is_empty() {
        return Ok(());
    }

    let mut item_ids: Vec<ObjectId> = movements.iter().map(|m| m.key.item_id).collect();
    item_ids.sort();
    item_ids.dedup();
    let items: Vec<Item> = state
        .items
        .find(doc! { "_id": { "$in": &item_ids }, "company_id": company_id })
        .await?
        .try_collect()
        .await?;
    if items.len() != item_ids.len() {
        return Err(DomainError::validation("item does not belong to this company"));
    }

    let mut available = available_batches(&items);
    let mut outgoing = Vec::new();
    for movement in movements {
        if !movement.delta.is_finite() {
            return Err(DomainError::validation("quantity must be a number"));
        }
        if movement.delta > 0.0 {
            *available.entry(movement.key.clone()).or_insert(0.0) += movement.delta;
        } else if movement.delta < 0.0 {
            outgoing.push((movement.key.clone(), -movement.delta));
        }
    }
    let shortages = check_allocation(&available, &outgoing);
    if !shortages.is_empty() {
        let names: HashMap<ObjectId, String> = items
            .iter()
            .filter_map(|i| i.id.map(|id| (id, i.name.clone())))
            .collect();
        let message = describe_shortages(&shortages, &names);
        warn!(company_id = %company_id, %message, "stock allocation rejected");
        return Err(DomainError::InsufficientStock(message).into());
    }

    // Additions first so reversals free up stock before removals claim it.
    let mut ordered: Vec<&StockMovement> = movements.iter().filter(|m| m.delta > 0.0).collect();
    ordered.extend(movements.iter().filter(|m| m.delta < 0.0));

    let mut applied: Vec<&StockMovement> = Vec::with_capacity(ordered.len());
    for movement in ordered {
        if let Err(err) = apply_one(state, company_id, movement).await {
            for done in applied.iter().rev() {
                if let Err(revert_err) = apply_one(state, company_id, &done.inverse()).await {
                    error!(
                        item_id = %done.key.item_id,
                        batch = %done.key.batch_number,
                        error = ?revert_err,
                        "failed to revert stock movement"
                    );
                }
            }
            return Err(err);
        }
        applied.push(movement);
    }
    Ok(())
}

fn expiry_bson(expiry: Option<NaiveDate>) -> Result<Bson> {
    Ok(to_bson(&expiry)?)
}

async fn apply_one(state: &AppState, company_id: &ObjectId, movement: &StockMovement) -> Result<()> {
    let key = &movement.key;
    let expiry = expiry_bson(key.expiry_date)?;

    if movement.delta < 0.0 {
        let quantity = -movement.delta;
        let res = state
            .items
            .update_one(
                doc! {
                    "_id": key.item_id,
                    "company_id": company_id,
                    "stock_entries": { "$elemMatch": {
                        "batch_number": &key.batch_number,
                        "expiry_date": expiry,
                        "quantity": { "$gte": quantity },
                    } },
                },
                doc! { "$inc": { "stock_entries.$.quantity": -quantity } },
            )
            .await?;
        if res.matched_count == 0 {
            return Err(DomainError::InsufficientStock(format!(
                "batch {} no longer has {} available",
                key.batch_number, quantity
            ))
            .into());
        }
        return Ok(());
    }

    let batch_filter = doc! {
        "batch_number": &key.batch_number,
        "expiry_date": expiry,
    };
    let mut update = doc! { "$inc": { "stock_entries.$.quantity": movement.delta } };
    // A purchase into an existing batch refreshes its prices.
    if let Some(seed) = movement.seed.as_ref().filter(|s| s.purchase_bill_id.is_some()) {
        update.insert(
            "$set",
            doc! {
                "stock_entries.$.price": seed.price,
                "stock_entries.$.pu_price": seed.pu_price,
                "stock_entries.$.mrp": seed.mrp,
            },
        );
    }
    let mut entry = movement.seed.clone();
    if let Some(entry) = entry.as_mut() {
        entry.batch_number = key.batch_number.clone();
        entry.expiry_date = key.expiry_date;
        entry.quantity = movement.delta;
    }

    // One entry per (batch, expiry): the push only matches while the batch is absent,
    // so a concurrent push for the same batch turns the next attempt into an `$inc`.
    for _ in 0..INBOUND_ATTEMPTS {
        let res = state
            .items
            .update_one(
                doc! {
                    "_id": key.item_id,
                    "company_id": company_id,
                    "stock_entries": { "$elemMatch": batch_filter.clone() },
                },
                update.clone(),
            )
            .await?;
        if res.matched_count > 0 {
            return Ok(());
        }

        let Some(entry) = entry.as_ref() else {
            return Err(anyhow!(
                "batch {} not found for item {}",
                key.batch_number,
                key.item_id
            ));
        };
        let res = state
            .items
            .update_one(
                doc! {
                    "_id": key.item_id,
                    "company_id": company_id,
                    "stock_entries": { "$not": { "$elemMatch": batch_filter.clone() } },
                },
                doc! { "$push": { "stock_entries": to_bson(entry)? } },
            )
            .await?;
        if res.matched_count > 0 {
            return Ok(());
        }

        let exists = state
            .items
            .count_documents(doc! { "_id": key.item_id, "company_id": company_id })
            .await?;
        if exists == 0 {
            return Err(DomainError::not_found("item"));
        }
    }
    Err(anyhow!(
        "batch {} of item {} kept changing while stock was added",
        key.batch_number,
        key.item_id
    ))
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpiringBatch {
    pub item_id: ObjectId,
    pub item_name: String,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity: f64,
}

/// Batches with stock left that expire on or before `until`, soonest first.
pub async fn expiring_batches(
    state: &AppState,
    company_id: &ObjectId,
    until: NaiveDate,
) -> Result<Vec<ExpiringBatch>> {
    let mut cursor = state.items.find(doc! { "company_id": company_id }).await?;
    let mut batches = Vec::new();
    while let Some(item) = cursor.try_next().await? {
        let Some(item_id) = item.id else { continue };
        for entry in &item.stock_entries {
            let Some(expiry) = entry.expiry_date else { continue };
            if entry.quantity > 0.0 && expiry <= until {
                batches.push(ExpiringBatch {
                    item_id,
                    item_name: item.name.clone(),
                    batch_number: entry.batch_number.clone(),
                    expiry_date: expiry,
                    quantity: entry.quantity,
                });
            }
        }
    }
    batches.sort_by_key(|b| b.expiry_date);
    Ok(batches)
}
