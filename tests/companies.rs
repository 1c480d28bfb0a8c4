#[path = "common/mod.rs"]
mod common;

use mongodb::bson::{Document, doc};
use serde_json::json;

use pharmaledger::error::DomainError;
use pharmaledger::ledger::Balance;
use pharmaledger::models::{BalanceType, VoucherKind};
use pharmaledger::state::{
    COMPANY_COLLECTIONS, DEFAULT_ACCOUNT_GROUPS, DEFAULT_ACCOUNTS, DEFAULT_UNITS, Lookup,
    OpeningStockInput, account_balance, create_company, create_item, create_journal,
    create_next_fiscal_year, create_opening_stock, default_account, delete_company, get_account,
    get_company_by_id, get_item, list_account_groups, list_accounts, list_fiscal_years,
    list_lookup, list_opening_stocks, update_company,
};

#[tokio::test]
async fn new_company_gets_default_chart_and_units() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let tenant = common::create_tenant(state, "Sunrise Pharmacy").await;
    let company_id = tenant.company_id();

    let groups = list_account_groups(state, &company_id).await.unwrap();
    assert_eq!(groups.len(), DEFAULT_ACCOUNT_GROUPS.len());
    assert!(groups.iter().all(|g| g.is_default));

    let accounts = list_accounts(state, &company_id).await.unwrap();
    assert_eq!(accounts.len(), DEFAULT_ACCOUNTS.len());

    let units = list_lookup(state, Lookup::Unit, &company_id).await.unwrap();
    assert_eq!(units.len(), DEFAULT_UNITS.len());

    let years = list_fiscal_years(state, &company_id).await.unwrap();
    assert_eq!(years.len(), 1);
    assert!(tenant.fiscal_year.start_date < tenant.fiscal_year.end_date);

    common::teardown(ctx).await;
}

#[tokio::test]
async fn company_names_are_unique() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let tenant = common::create_tenant(state, "Sunrise Pharmacy").await;
    let other = common::create_tenant(state, "Moonlight Pharmacy").await;

    let err = create_company(
        state,
        &tenant.user_id,
        &common::company_input("Sunrise Pharmacy"),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DomainError>(),
        Some(DomainError::Conflict(_))
    ));

    let err = update_company(
        state,
        &other.company_id(),
        &common::company_input("Sunrise Pharmacy"),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DomainError>(),
        Some(DomainError::Conflict(_))
    ));

    // Renaming a company to its own name is fine.
    update_company(
        state,
        &other.company_id(),
        &common::company_input("Moonlight Pharmacy"),
    )
    .await
    .unwrap();
    let stored = get_company_by_id(state, &other.company_id())
        .await
        .unwrap()
        .unwrap();
    let updated_at = stored.updated_at.expect("update stamps updated_at");
    assert!(updated_at >= stored.created_at.unwrap());

    common::teardown(ctx).await;
}

#[tokio::test]
async fn deleting_a_company_removes_every_owned_document() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let tenant = common::create_tenant(state, "Sunrise Pharmacy").await;
    let keep = common::create_tenant(state, "Moonlight Pharmacy").await;
    let company_id = tenant.company_id();

    let item = create_item(
        state,
        &company_id,
        &tenant.fiscal_year_id(),
        &serde_json::from_value(json!({ "name": "Paracetamol 500mg", "price": 2.5 })).unwrap(),
    )
    .await
    .unwrap();
    create_opening_stock(
        state,
        &company_id,
        &tenant.fiscal_year_id(),
        tenant.fiscal_year.start_date,
        &serde_json::from_value(json!({ "item_id": item.to_hex(), "quantity": 20.0 })).unwrap(),
    )
    .await
    .unwrap();
    let cash = default_account(state, &company_id, "Cash in Hand").await.unwrap();
    let capital = default_account(state, &company_id, "Capital").await.unwrap();
    create_journal(
        state,
        &tenant.voucher_context(),
        VoucherKind::Journal,
        &serde_json::from_value(json!({
            "date": tenant.fiscal_year.start_date,
            "debit_lines": [{ "account_id": cash.to_hex(), "amount": 1000.0 }],
            "credit_lines": [{ "account_id": capital.to_hex(), "amount": 1000.0 }],
        }))
        .unwrap(),
    )
    .await
    .unwrap();

    let removed = delete_company(state, &company_id).await.unwrap();
    assert!(removed > 0);

    for name in COMPANY_COLLECTIONS {
        let left = state
            .db
            .collection::<Document>(name)
            .count_documents(doc! { "company_id": company_id })
            .await
            .unwrap();
        assert_eq!(left, 0, "{name} still holds documents of the deleted company");
    }
    assert!(
        state
            .companies
            .find_one(doc! { "_id": company_id })
            .await
            .unwrap()
            .is_none()
    );

    // The other tenant is untouched.
    let accounts = list_accounts(state, &keep.company_id()).await.unwrap();
    assert_eq!(accounts.len(), DEFAULT_ACCOUNTS.len());

    let err = delete_company(state, &company_id).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DomainError>(),
        Some(DomainError::NotFound(_))
    ));

    common::teardown(ctx).await;
}

#[tokio::test]
async fn next_fiscal_year_carries_real_balances_and_stock() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let tenant = common::create_tenant(state, "Sunrise Pharmacy").await;
    let company_id = tenant.company_id();
    let voucher_ctx = tenant.voucher_context();

    let cash = default_account(state, &company_id, "Cash in Hand").await.unwrap();
    let capital = default_account(state, &company_id, "Capital").await.unwrap();
    let sales = default_account(state, &company_id, "Sales").await.unwrap();
    create_journal(
        state,
        &voucher_ctx,
        VoucherKind::Journal,
        &serde_json::from_value(json!({
            "date": tenant.fiscal_year.start_date,
            "debit_lines": [{ "account_id": cash.to_hex(), "amount": 750.0 }],
            "credit_lines": [
                { "account_id": capital.to_hex(), "amount": 500.0 },
                { "account_id": sales.to_hex(), "amount": 250.0 },
            ],
        }))
        .unwrap(),
    )
    .await
    .unwrap();

    let item = create_item(
        state,
        &company_id,
        &tenant.fiscal_year_id(),
        &serde_json::from_value(json!({ "name": "Amoxicillin 250mg" })).unwrap(),
    )
    .await
    .unwrap();
    create_opening_stock(
        state,
        &company_id,
        &tenant.fiscal_year_id(),
        tenant.fiscal_year.start_date,
        &serde_json::from_value(json!({ "item_id": item.to_hex(), "quantity": 12.0 })).unwrap(),
    )
    .await
    .unwrap();

    let next = create_next_fiscal_year(state, &company_id).await.unwrap();
    let next_id = next.id.unwrap();
    assert_eq!(
        next.start_date,
        tenant.fiscal_year.end_date.succ_opt().unwrap()
    );

    let cash_account = get_account(state, &company_id, &cash).await.unwrap().unwrap();
    assert_eq!(
        account_balance(state, &cash_account, &next_id).await.unwrap(),
        Balance {
            amount: 750.0,
            balance_type: BalanceType::Dr
        }
    );
    let capital_account = get_account(state, &company_id, &capital)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        account_balance(state, &capital_account, &next_id)
            .await
            .unwrap(),
        Balance {
            amount: 500.0,
            balance_type: BalanceType::Cr
        }
    );
    // Income restarts at zero.
    let sales_account = get_account(state, &company_id, &sales).await.unwrap().unwrap();
    assert_eq!(
        account_balance(state, &sales_account, &next_id)
            .await
            .unwrap(),
        Balance::ZERO
    );

    let carried = list_opening_stocks(state, &company_id, &next_id).await.unwrap();
    assert_eq!(carried.len(), 1);
    assert!(carried[0].carried_forward);
    assert_eq!(carried[0].quantity, 12.0);

    common::teardown(ctx).await;
}

#[tokio::test]
async fn opening_stock_is_unique_per_item_and_fiscal_year() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let tenant = common::create_tenant(state, "Sunrise Pharmacy").await;
    let company_id = tenant.company_id();
    let fy_id = tenant.fiscal_year_id();

    let item = create_item(
        state,
        &company_id,
        &fy_id,
        &serde_json::from_value(json!({ "name": "Ibuprofen 400mg" })).unwrap(),
    )
    .await
    .unwrap();
    let opening = |quantity: f64| -> OpeningStockInput {
        serde_json::from_value(json!({ "item_id": item.to_hex(), "quantity": quantity })).unwrap()
    };
    create_opening_stock(
        state,
        &company_id,
        &fy_id,
        tenant.fiscal_year.start_date,
        &opening(10.0),
    )
    .await
    .unwrap();

    let err = create_opening_stock(
        state,
        &company_id,
        &fy_id,
        tenant.fiscal_year.start_date,
        &opening(5.0),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DomainError>(),
        Some(DomainError::Conflict(_))
    ));

    assert_eq!(
        list_opening_stocks(state, &company_id, &fy_id)
            .await
            .unwrap()
            .len(),
        1
    );
    let stored = get_item(state, &company_id, &item).await.unwrap().unwrap();
    assert_eq!(stored.total_stock(), 10.0);

    common::teardown(ctx).await;
}
