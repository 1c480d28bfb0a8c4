use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use futures::stream::TryStreamExt;
use mongodb::{
    Collection,
    bson::{doc, oid::ObjectId, to_bson},
};
use serde::Deserialize;
use tracing::info;

use crate::batches::BatchKey;
use crate::error::{DomainError, is_duplicate_key};
use crate::ids;
use crate::models::{Item, NamedEntry, OpeningStock, Rack, StockEntry, Store, VatStatus, VoucherKind};

use super::{
    AppState,
    stock::{StockMovement, apply_movements},
};

/// The four name-only lookup collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Unit,
    MainUnit,
    Category,
    ItemsCompany,
}

impl Lookup {
    pub fn label(&self) -> &'static str {
        match self {
            Lookup::Unit => "unit",
            Lookup::MainUnit => "main unit",
            Lookup::Category => "category",
            Lookup::ItemsCompany => "items company",
        }
    }

    /// Field on `Item` that references this lookup.
    fn item_field(&self) -> &'static str {
        match self {
            Lookup::Unit => "unit_id",
            Lookup::MainUnit => "main_unit_id",
            Lookup::Category => "category_id",
            Lookup::ItemsCompany => "items_company_id",
        }
    }

    fn collection<'a>(&self, state: &'a AppState) -> &'a Collection<NamedEntry> {
        match self {
            Lookup::Unit => &state.units,
            Lookup::MainUnit => &state.main_units,
            Lookup::Category => &state.categories,
            Lookup::ItemsCompany => &state.items_companies,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NameInput {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RackInput {
    pub name: String,
    #[serde(deserialize_with = "ids::object_id")]
    pub store_id: ObjectId,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemInput {
    pub name: String,
    #[serde(default)]
    pub hscode: Option<String>,
    #[serde(default, deserialize_with = "ids::option_object_id")]
    pub category_id: Option<ObjectId>,
    #[serde(default, deserialize_with = "ids::option_object_id")]
    pub items_company_id: Option<ObjectId>,
    #[serde(default, deserialize_with = "ids::option_object_id")]
    pub unit_id: Option<ObjectId>,
    #[serde(default, deserialize_with = "ids::option_object_id")]
    pub main_unit_id: Option<ObjectId>,
    #[serde(default)]
    pub ws_unit: Option<f64>,
    #[serde(default)]
    pub vat_status: VatStatus,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub pu_price: f64,
    #[serde(default)]
    pub reorder_level: f64,
    #[serde(default, deserialize_with = "ids::option_object_id")]
    pub store_id: Option<ObjectId>,
    #[serde(default, deserialize_with = "ids::option_object_id")]
    pub rack_id: Option<ObjectId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpeningStockInput {
    #[serde(deserialize_with = "ids::object_id")]
    pub item_id: ObjectId,
    #[serde(default)]
    pub batch_number: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    pub quantity: f64,
    #[serde(default)]
    pub pu_price: f64,
    #[serde(default)]
    pub price: f64,
}

/// Batch number used when opening stock is entered without one.
pub const OPENING_BATCH: &str = "OPENING";

fn required_name(name: &str, what: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation(format!("{what} name is required")));
    }
    Ok(name.to_string())
}

fn inserted(res: mongodb::results::InsertOneResult, what: &str) -> Result<ObjectId> {
    res.inserted_id
        .as_object_id()
        .with_context(|| format!("{what} insert missing _id"))
}

/// Turns a unique-index violation into a conflict carrying `message`.
fn conflict_on_duplicate(err: mongodb::error::Error, message: String) -> anyhow::Error {
    if is_duplicate_key(&err) {
        DomainError::conflict(message)
    } else {
        err.into()
    }
}

// ---------------------------------------------------------------------------
// Units, main units, categories, items companies
// ---------------------------------------------------------------------------

pub async fn list_lookup(
    state: &AppState,
    lookup: Lookup,
    company_id: &ObjectId,
) -> Result<Vec<NamedEntry>> {
    let entries: Vec<NamedEntry> = lookup
        .collection(state)
        .find(doc! { "company_id": company_id })
        .sort(doc! { "name": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(entries)
}

pub async fn get_lookup(
    state: &AppState,
    lookup: Lookup,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<Option<NamedEntry>> {
    lookup
        .collection(state)
        .find_one(doc! { "_id": id, "company_id": company_id })
        .await
        .map_err(Into::into)
}

async fn lookup_name_taken(
    state: &AppState,
    lookup: Lookup,
    company_id: &ObjectId,
    name: &str,
    except: Option<&ObjectId>,
) -> Result<bool> {
    let mut filter = doc! { "company_id": company_id, "name": name };
    if let Some(id) = except {
        filter.insert("_id", doc! { "$ne": id });
    }
    Ok(lookup.collection(state).find_one(filter).await?.is_some())
}

pub async fn create_lookup(
    state: &AppState,
    lookup: Lookup,
    company_id: &ObjectId,
    input: &NameInput,
) -> Result<ObjectId> {
    let name = required_name(&input.name, lookup.label())?;
    if lookup_name_taken(state, lookup, company_id, &name, None).await? {
        return Err(DomainError::conflict(format!("{} {name} already exists", lookup.label())));
    }
    let res = lookup
        .collection(state)
        .insert_one(NamedEntry {
            id: None,
            company_id: *company_id,
            name,
        })
        .await?;
    inserted(res, lookup.label())
}

pub async fn update_lookup(
    state: &AppState,
    lookup: Lookup,
    company_id: &ObjectId,
    id: &ObjectId,
    input: &NameInput,
) -> Result<()> {
    let name = required_name(&input.name, lookup.label())?;
    if lookup_name_taken(state, lookup, company_id, &name, Some(id)).await? {
        return Err(DomainError::conflict(format!("{} {name} already exists", lookup.label())));
    }
    let res = lookup
        .collection(state)
        .update_one(
            doc! { "_id": id, "company_id": company_id },
            doc! { "$set": { "name": name } },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(DomainError::not_found(lookup.label()));
    }
    Ok(())
}

pub async fn delete_lookup(
    state: &AppState,
    lookup: Lookup,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<()> {
    let mut used = doc! { "company_id": company_id };
    used.insert(lookup.item_field(), id);
    if state.items.find_one(used).await?.is_some() {
        return Err(DomainError::conflict(format!("{} is used by items", lookup.label())));
    }
    let res = lookup
        .collection(state)
        .delete_one(doc! { "_id": id, "company_id": company_id })
        .await?;
    if res.deleted_count == 0 {
        return Err(DomainError::not_found(lookup.label()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Stores and racks
// ---------------------------------------------------------------------------

pub async fn list_stores(state: &AppState, company_id: &ObjectId) -> Result<Vec<Store>> {
    let stores: Vec<Store> = state
        .stores
        .find(doc! { "company_id": company_id })
        .sort(doc! { "name": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(stores)
}

pub async fn get_store(
    state: &AppState,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<Option<Store>> {
    state
        .stores
        .find_one(doc! { "_id": id, "company_id": company_id })
        .await
        .map_err(Into::into)
}

pub async fn create_store(
    state: &AppState,
    company_id: &ObjectId,
    input: &StoreInput,
) -> Result<ObjectId> {
    let name = required_name(&input.name, "store")?;
    let res = state
        .stores
        .insert_one(Store {
            id: None,
            company_id: *company_id,
            name: name.clone(),
            description: input.description.clone(),
        })
        .await
        .map_err(|e| conflict_on_duplicate(e, format!("store {name} already exists")))?;
    inserted(res, "store")
}

pub async fn update_store(
    state: &AppState,
    company_id: &ObjectId,
    id: &ObjectId,
    input: &StoreInput,
) -> Result<()> {
    let name = required_name(&input.name, "store")?;
    let res = state
        .stores
        .update_one(
            doc! { "_id": id, "company_id": company_id },
            doc! { "$set": { "name": &name, "description": &input.description } },
        )
        .await
        .map_err(|e| conflict_on_duplicate(e, format!("store {name} already exists")))?;
    if res.matched_count == 0 {
        return Err(DomainError::not_found("store"));
    }
    Ok(())
}

pub async fn delete_store(state: &AppState, company_id: &ObjectId, id: &ObjectId) -> Result<()> {
    if state
        .racks
        .find_one(doc! { "company_id": company_id, "store_id": id })
        .await?
        .is_some()
    {
        return Err(DomainError::conflict("store still has racks"));
    }
    let res = state
        .stores
        .delete_one(doc! { "_id": id, "company_id": company_id })
        .await?;
    if res.deleted_count == 0 {
        return Err(DomainError::not_found("store"));
    }
    Ok(())
}

pub async fn list_racks(
    state: &AppState,
    company_id: &ObjectId,
    store_id: Option<&ObjectId>,
) -> Result<Vec<Rack>> {
    let mut filter = doc! { "company_id": company_id };
    if let Some(store_id) = store_id {
        filter.insert("store_id", store_id);
    }
    let racks: Vec<Rack> = state
        .racks
        .find(filter)
        .sort(doc! { "name": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(racks)
}

pub async fn get_rack(
    state: &AppState,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<Option<Rack>> {
    state
        .racks
        .find_one(doc! { "_id": id, "company_id": company_id })
        .await
        .map_err(Into::into)
}

async fn ensure_store(state: &AppState, company_id: &ObjectId, store_id: &ObjectId) -> Result<()> {
    if get_store(state, company_id, store_id).await?.is_none() {
        return Err(DomainError::validation("store does not belong to this company"));
    }
    Ok(())
}

pub async fn create_rack(
    state: &AppState,
    company_id: &ObjectId,
    input: &RackInput,
) -> Result<ObjectId> {
    let name = required_name(&input.name, "rack")?;
    ensure_store(state, company_id, &input.store_id).await?;
    let res = state
        .racks
        .insert_one(Rack {
            id: None,
            company_id: *company_id,
            store_id: input.store_id,
            name: name.clone(),
            description: input.description.clone(),
        })
        .await
        .map_err(|e| conflict_on_duplicate(e, format!("rack {name} already exists in this store")))?;
    inserted(res, "rack")
}

pub async fn update_rack(
    state: &AppState,
    company_id: &ObjectId,
    id: &ObjectId,
    input: &RackInput,
) -> Result<()> {
    let name = required_name(&input.name, "rack")?;
    ensure_store(state, company_id, &input.store_id).await?;
    let res = state
        .racks
        .update_one(
            doc! { "_id": id, "company_id": company_id },
            doc! { "$set": {
                "name": &name,
                "store_id": input.store_id,
                "description": &input.description,
            } },
        )
        .await
        .map_err(|e| conflict_on_duplicate(e, format!("rack {name} already exists in this store")))?;
    if res.matched_count == 0 {
        return Err(DomainError::not_found("rack"));
    }
    Ok(())
}

pub async fn delete_rack(state: &AppState, company_id: &ObjectId, id: &ObjectId) -> Result<()> {
    let res = state
        .racks
        .delete_one(doc! { "_id": id, "company_id": company_id })
        .await?;
    if res.deleted_count == 0 {
        return Err(DomainError::not_found("rack"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

pub async fn list_items(
    state: &AppState,
    company_id: &ObjectId,
    search: Option<&str>,
) -> Result<Vec<Item>> {
    let mut filter = doc! { "company_id": company_id };
    if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
        filter.insert(
            "name",
            doc! { "$regex": regex_escape(term), "$options": "i" },
        );
    }
    let items: Vec<Item> = state
        .items
        .find(filter)
        .sort(doc! { "name": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(items)
}

fn regex_escape(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if "\\.^$|?*+()[]{}".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub async fn get_item(state: &AppState, company_id: &ObjectId, id: &ObjectId) -> Result<Option<Item>> {
    state
        .items
        .find_one(doc! { "_id": id, "company_id": company_id })
        .await
        .map_err(Into::into)
}

/// Every reference on the item must point at a document of the same company.
async fn validate_item_refs(state: &AppState, company_id: &ObjectId, input: &ItemInput) -> Result<()> {
    let lookups = [
        (Lookup::Category, input.category_id),
        (Lookup::ItemsCompany, input.items_company_id),
        (Lookup::Unit, input.unit_id),
        (Lookup::MainUnit, input.main_unit_id),
    ];
    for (lookup, id) in lookups {
        if let Some(id) = id {
            if get_lookup(state, lookup, company_id, &id).await?.is_none() {
                return Err(DomainError::validation(format!(
                    "{} does not belong to this company",
                    lookup.label()
                )));
            }
        }
    }
    if let Some(store_id) = &input.store_id {
        ensure_store(state, company_id, store_id).await?;
    }
    if let Some(rack_id) = &input.rack_id {
        let rack = get_rack(state, company_id, rack_id)
            .await?
            .ok_or_else(|| DomainError::validation("rack does not belong to this company"))?;
        if input.store_id.is_some_and(|s| s != rack.store_id) {
            return Err(DomainError::validation("rack is not in the selected store"));
        }
    }
    if input.price < 0.0 || input.pu_price < 0.0 || input.reorder_level < 0.0 {
        return Err(DomainError::validation("prices and reorder level cannot be negative"));
    }
    Ok(())
}

async fn item_name_taken(
    state: &AppState,
    company_id: &ObjectId,
    name: &str,
    except: Option<&ObjectId>,
) -> Result<bool> {
    let mut filter = doc! { "company_id": company_id, "name": name };
    if let Some(id) = except {
        filter.insert("_id", doc! { "$ne": id });
    }
    Ok(state.items.find_one(filter).await?.is_some())
}

pub async fn create_item(
    state: &AppState,
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
    input: &ItemInput,
) -> Result<ObjectId> {
    let name = required_name(&input.name, "item")?;
    validate_item_refs(state, company_id, input).await?;
    if item_name_taken(state, company_id, &name, None).await? {
        return Err(DomainError::conflict(format!("item {name} already exists")));
    }
    let res = state
        .items
        .insert_one(Item {
            id: None,
            company_id: *company_id,
            name,
            hscode: input.hscode.clone(),
            category_id: input.category_id,
            items_company_id: input.items_company_id,
            unit_id: input.unit_id,
            main_unit_id: input.main_unit_id,
            ws_unit: input.ws_unit,
            vat_status: input.vat_status,
            price: input.price,
            pu_price: input.pu_price,
            reorder_level: input.reorder_level,
            store_id: input.store_id,
            rack_id: input.rack_id,
            stock_entries: Vec::new(),
            fiscal_year_id: *fiscal_year_id,
            created_at: Some(Utc::now()),
            updated_at: None,
        })
        .await?;
    let id = inserted(res, "item")?;
    info!(item_id = %id, company_id = %company_id, "item created");
    Ok(id)
}

/// Updates the item master fields. Stock entries are only changed by stock movements.
pub async fn update_item(
    state: &AppState,
    company_id: &ObjectId,
    id: &ObjectId,
    input: &ItemInput,
) -> Result<()> {
    let name = required_name(&input.name, "item")?;
    validate_item_refs(state, company_id, input).await?;
    if item_name_taken(state, company_id, &name, Some(id)).await? {
        return Err(DomainError::conflict(format!("item {name} already exists")));
    }
    let res = state
        .items
        .update_one(
            doc! { "_id": id, "company_id": company_id },
            doc! { "$set": {
                "name": name,
                "hscode": &input.hscode,
                "category_id": input.category_id,
                "items_company_id": input.items_company_id,
                "unit_id": input.unit_id,
                "main_unit_id": input.main_unit_id,
                "ws_unit": input.ws_unit,
                "vat_status": to_bson(&input.vat_status)?,
                "price": input.price,
                "pu_price": input.pu_price,
                "reorder_level": input.reorder_level,
                "store_id": input.store_id,
                "rack_id": input.rack_id,
                "updated_at": to_bson(&Utc::now())?,
            } },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(DomainError::not_found("item"));
    }
    Ok(())
}

/// Items that still hold stock or appear on any bill or adjustment stay.
pub async fn delete_item(state: &AppState, company_id: &ObjectId, id: &ObjectId) -> Result<()> {
    let item = get_item(state, company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("item"))?;
    if item.total_stock() > 0.0 {
        return Err(DomainError::conflict(format!(
            "item {} still has stock on hand",
            item.name
        )));
    }
    let used_filter = doc! { "company_id": company_id, "lines.item_id": id };
    for kind in VoucherKind::ALL.into_iter().filter(|k| k.is_bill()) {
        if state.bills(kind)?.find_one(used_filter.clone()).await?.is_some() {
            return Err(DomainError::conflict(format!(
                "item {} is used on {} documents",
                item.name,
                kind.as_str()
            )));
        }
    }
    if state
        .stock_adjustments
        .find_one(used_filter)
        .await?
        .is_some()
    {
        return Err(DomainError::conflict(format!(
            "item {} is used on stock adjustments",
            item.name
        )));
    }
    state
        .opening_stocks
        .delete_many(doc! { "company_id": company_id, "item_id": id })
        .await?;
    state.items.delete_one(doc! { "_id": id }).await?;
    info!(item_id = %id, company_id = %company_id, "item deleted");
    Ok(())
}

/// Batches with stock left, earliest expiry first (undated batches last).
pub fn item_batches(item: &Item) -> Vec<StockEntry> {
    let mut batches: Vec<StockEntry> = item
        .stock_entries
        .iter()
        .filter(|e| e.quantity > 0.0)
        .cloned()
        .collect();
    batches.sort_by(|a, b| match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.batch_number.cmp(&b.batch_number),
    });
    batches
}

// ---------------------------------------------------------------------------
// Opening stock
// ---------------------------------------------------------------------------

pub async fn list_opening_stocks(
    state: &AppState,
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
) -> Result<Vec<OpeningStock>> {
    let rows: Vec<OpeningStock> = state
        .opening_stocks
        .find(doc! { "company_id": company_id, "fiscal_year_id": fiscal_year_id })
        .await?
        .try_collect()
        .await?;
    Ok(rows)
}

fn opening_key(row: &OpeningStock) -> BatchKey {
    BatchKey::new(
        row.item_id,
        row.batch_number.as_deref().unwrap_or(OPENING_BATCH),
        row.expiry_date,
    )
}

/// Records the opening quantity of an item for a fiscal year and adds it to stock.
/// An item has at most one opening stock row per fiscal year.
pub async fn create_opening_stock(
    state: &AppState,
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
    fiscal_year_start: NaiveDate,
    input: &OpeningStockInput,
) -> Result<ObjectId> {
    if !input.quantity.is_finite() || input.quantity <= 0.0 {
        return Err(DomainError::validation("opening quantity must be positive"));
    }
    let item = get_item(state, company_id, &input.item_id)
        .await?
        .ok_or_else(|| DomainError::validation("item does not belong to this company"))?;

    let batch_number = input
        .batch_number
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string);
    let row = OpeningStock {
        id: None,
        company_id: *company_id,
        item_id: input.item_id,
        fiscal_year_id: *fiscal_year_id,
        batch_number,
        expiry_date: input.expiry_date,
        quantity: input.quantity,
        pu_price: input.pu_price,
        price: input.price,
        carried_forward: false,
        created_at: Some(Utc::now()),
    };
    let res = state.opening_stocks.insert_one(&row).await.map_err(|e| {
        conflict_on_duplicate(
            e,
            format!("opening stock for {} already recorded in this fiscal year", item.name),
        )
    })?;
    let id = inserted(res, "opening stock")?;

    let key = opening_key(&row);
    let seed = StockEntry {
        batch_number: key.batch_number.clone(),
        expiry_date: key.expiry_date,
        quantity: row.quantity,
        price: row.price,
        pu_price: row.pu_price,
        mrp: row.price,
        store_id: item.store_id,
        rack_id: item.rack_id,
        purchase_bill_id: None,
        date: fiscal_year_start,
    };
    let movement = StockMovement::inbound(key, row.quantity, seed);
    if let Err(err) = apply_movements(state, company_id, &[movement]).await {
        state.opening_stocks.delete_one(doc! { "_id": id }).await?;
        return Err(err);
    }
    info!(opening_stock_id = %id, item_id = %input.item_id, "opening stock recorded");
    Ok(id)
}

/// Removes an opening stock row. Rows entered by hand also take their quantity back
/// out of stock, which fails once that stock has been sold.
pub async fn delete_opening_stock(
    state: &AppState,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<()> {
    let row = state
        .opening_stocks
        .find_one(doc! { "_id": id, "company_id": company_id })
        .await?
        .ok_or_else(|| DomainError::not_found("opening stock"))?;
    if !row.carried_forward {
        let movement = StockMovement::outbound(opening_key(&row), row.quantity);
        apply_movements(state, company_id, &[movement]).await?;
    }
    state.opening_stocks.delete_one(doc! { "_id": id }).await?;
    Ok(())
}

