use anyhow::{Context, Result};
use chrono::{Datelike, Months, NaiveDate, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson};
use std::collections::HashMap;
use tracing::info;

use crate::error::DomainError;
use crate::models::{FiscalOpening, FiscalYear, OpeningStock};

use super::{AppState, accounts::account_balance};

/// "2025" for a calendar-year period, "2025/26" for one that straddles two years.
pub fn fiscal_year_name(start: NaiveDate, end: NaiveDate) -> String {
    if start.year() == end.year() {
        start.year().to_string()
    } else {
        format!("{}/{:02}", start.year(), end.year().rem_euclid(100))
    }
}

/// One year starting on `start`, ending the day before the same date next year.
pub fn period_from(start: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    let end = start
        .checked_add_months(Months::new(12))
        .and_then(|d| d.pred_opt())
        .context("fiscal year end out of range")?;
    Ok((start, end))
}

/// The period that follows one ending on `previous_end`.
pub fn next_period(previous_end: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    let start = previous_end
        .succ_opt()
        .context("fiscal year start out of range")?;
    period_from(start)
}

async fn insert_fiscal_year(
    state: &AppState,
    company_id: &ObjectId,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<FiscalYear> {
    let mut fiscal_year = FiscalYear {
        id: None,
        company_id: *company_id,
        name: fiscal_year_name(start, end),
        start_date: start,
        end_date: end,
        created_at: Some(Utc::now()),
    };
    let res = state.fiscal_years.insert_one(&fiscal_year).await?;
    fiscal_year.id = Some(
        res.inserted_id
            .as_object_id()
            .context("fiscal year insert missing _id")?,
    );
    Ok(fiscal_year)
}

pub(super) async fn create_initial_fiscal_year(
    state: &AppState,
    company_id: &ObjectId,
    start: Option<NaiveDate>,
) -> Result<ObjectId> {
    let start = match start {
        Some(start) => start,
        None => NaiveDate::from_ymd_opt(Utc::now().year(), 1, 1)
            .context("invalid default fiscal year start")?,
    };
    let (start, end) = period_from(start)?;
    let fiscal_year = insert_fiscal_year(state, company_id, start, end).await?;
    fiscal_year.id.context("fiscal year missing _id")
}

pub async fn list_fiscal_years(state: &AppState, company_id: &ObjectId) -> Result<Vec<FiscalYear>> {
    let years: Vec<FiscalYear> = state
        .fiscal_years
        .find(doc! { "company_id": company_id })
        .sort(doc! { "start_date": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(years)
}

pub async fn get_fiscal_year(
    state: &AppState,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<Option<FiscalYear>> {
    state
        .fiscal_years
        .find_one(doc! { "_id": id, "company_id": company_id })
        .await
        .map_err(Into::into)
}

/// The most recent period is the one a company works in by default.
pub async fn latest_fiscal_year(
    state: &AppState,
    company_id: &ObjectId,
) -> Result<Option<FiscalYear>> {
    state
        .fiscal_years
        .find_one(doc! { "company_id": company_id })
        .sort(doc! { "start_date": -1 })
        .await
        .map_err(Into::into)
}

/// Opens the period after the latest one and carries balances into it: real
/// accounts get their closing balance as the new opening balance, and every
/// item with stock on hand gets a carried-forward opening stock row.
pub async fn create_next_fiscal_year(state: &AppState, company_id: &ObjectId) -> Result<FiscalYear> {
    let previous = latest_fiscal_year(state, company_id)
        .await?
        .ok_or_else(|| DomainError::not_found("fiscal year"))?;
    let previous_id = previous.id.context("fiscal year missing _id")?;
    let (start, end) = next_period(previous.end_date)?;
    let next = insert_fiscal_year(state, company_id, start, end).await?;
    let next_id = next.id.context("fiscal year missing _id")?;

    let carries: HashMap<ObjectId, bool> = state
        .account_groups
        .find(doc! { "company_id": company_id })
        .await?
        .try_collect::<Vec<_>>()
        .await?
        .into_iter()
        .filter_map(|g| g.id.map(|id| (id, g.nature.carries_forward())))
        .collect();

    let mut carried_accounts = 0;
    let mut accounts = state.accounts.find(doc! { "company_id": company_id }).await?;
    while let Some(account) = accounts.try_next().await? {
        if !carries.get(&account.group_id).copied().unwrap_or(false) {
            continue;
        }
        let Some(account_id) = account.id else { continue };
        let closing = account_balance(state, &account, &previous_id).await?;
        if closing.amount == 0.0 {
            continue;
        }
        let opening = FiscalOpening {
            fiscal_year_id: next_id,
            amount: closing.amount,
            balance_type: closing.balance_type,
        };
        state
            .accounts
            .update_one(
                doc! { "_id": account_id },
                doc! { "$push": { "opening_balances": to_bson(&opening)? } },
            )
            .await?;
        carried_accounts += 1;
    }

    let mut carried_items = 0;
    let mut items = state.items.find(doc! { "company_id": company_id }).await?;
    while let Some(item) = items.try_next().await? {
        let Some(item_id) = item.id else { continue };
        let quantity = item.total_stock();
        if quantity <= 0.0 {
            continue;
        }
        state
            .opening_stocks
            .insert_one(OpeningStock {
                id: None,
                company_id: *company_id,
                item_id,
                fiscal_year_id: next_id,
                batch_number: None,
                expiry_date: None,
                quantity,
                pu_price: item.pu_price,
                price: item.price,
                carried_forward: true,
                created_at: Some(Utc::now()),
            })
            .await?;
        carried_items += 1;
    }

    info!(
        company_id = %company_id,
        fiscal_year = %next.name,
        carried_accounts,
        carried_items,
        "fiscal year opened"
    );
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn names_follow_the_calendar() {
        assert_eq!(fiscal_year_name(date("2025-01-01"), date("2025-12-31")), "2025");
        assert_eq!(fiscal_year_name(date("2025-07-16"), date("2026-07-15")), "2025/26");
        assert_eq!(fiscal_year_name(date("2099-07-16"), date("2100-07-15")), "2099/00");
    }

    #[test]
    fn next_period_starts_the_day_after() {
        let (start, end) = next_period(date("2025-12-31")).unwrap();
        assert_eq!(start, date("2026-01-01"));
        assert_eq!(end, date("2026-12-31"));

        let (start, end) = next_period(date("2024-07-15")).unwrap();
        assert_eq!(start, date("2024-07-16"));
        assert_eq!(end, date("2025-07-15"));
    }

    #[test]
    fn leap_day_start_clamps() {
        let (_, end) = period_from(date("2024-02-29")).unwrap();
        assert_eq!(end, date("2025-02-27"));
    }
}
