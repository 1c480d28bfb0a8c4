#[path = "common/mod.rs"]
mod common;

use mongodb::bson::{doc, oid::ObjectId};
use serde_json::{Value, json};

use pharmaledger::error::DomainError;
use pharmaledger::ledger::Balance;
use pharmaledger::models::{BalanceType, VoucherKind};
use pharmaledger::state::{
    AppState, BillInput, JournalInput, account_balance, create_bill, create_cash_voucher,
    create_item, create_journal, create_stock_adjustment, default_account, delete_bill,
    delete_stock_adjustment, get_account, get_bill, get_item, get_journal, list_bills,
    next_bill_number, update_bill, update_journal,
};

fn bill_input(value: Value) -> BillInput {
    serde_json::from_value(value).unwrap()
}

async fn stock_of(state: &AppState, company_id: &ObjectId, item_id: &ObjectId) -> f64 {
    get_item(state, company_id, item_id)
        .await
        .unwrap()
        .unwrap()
        .total_stock()
}

async fn balance_of(
    state: &AppState,
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
    name: &str,
) -> Balance {
    let id = default_account(state, company_id, name).await.unwrap();
    let account = get_account(state, company_id, &id).await.unwrap().unwrap();
    account_balance(state, &account, fiscal_year_id).await.unwrap()
}

fn domain_error(err: &anyhow::Error) -> &DomainError {
    err.downcast_ref::<DomainError>()
        .unwrap_or_else(|| panic!("expected a domain error, got {err:?}"))
}

struct Fixture {
    tenant: common::Tenant,
    item_id: ObjectId,
}

async fn fixture(state: &AppState) -> Fixture {
    let tenant = common::create_tenant(state, "Sunrise Pharmacy").await;
    let item_id = create_item(
        state,
        &tenant.company_id(),
        &tenant.fiscal_year_id(),
        &serde_json::from_value(json!({
            "name": "Cetirizine 10mg",
            "price": 5.0,
            "pu_price": 3.0,
        }))
        .unwrap(),
    )
    .await
    .unwrap();
    Fixture { tenant, item_id }
}

fn line(item_id: &ObjectId, quantity: f64) -> Value {
    json!({
        "item_id": item_id.to_hex(),
        "batch_number": "CTZ-01",
        "expiry_date": "2031-06-30",
        "quantity": quantity,
    })
}

#[tokio::test]
async fn purchase_then_sale_moves_stock_and_posts_ledger() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let Fixture { tenant, item_id } = fixture(state).await;
    let company_id = tenant.company_id();
    let fy_id = tenant.fiscal_year_id();
    let voucher_ctx = tenant.voucher_context();
    let date = tenant.fiscal_year.start_date;

    let mut purchase_line = line(&item_id, 100.0);
    purchase_line["bonus"] = json!(10.0);
    let purchase = create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Purchase,
        &bill_input(json!({ "date": date, "lines": [purchase_line] })),
    )
    .await
    .unwrap();
    assert_eq!(purchase.bill_number, "PB-0001");
    assert_eq!(purchase.total_amount, 300.0);
    assert_eq!(stock_of(state, &company_id, &item_id).await, 110.0);

    let item = get_item(state, &company_id, &item_id).await.unwrap().unwrap();
    assert_eq!(item.stock_entries.len(), 1);
    assert_eq!(item.stock_entries[0].purchase_bill_id, purchase.id);

    let sale = create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Sales,
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 30.0)] })),
    )
    .await
    .unwrap();
    assert_eq!(sale.bill_number, "SB-0001");
    assert_eq!(sale.total_amount, 150.0);
    assert_eq!(stock_of(state, &company_id, &item_id).await, 80.0);

    assert_eq!(
        balance_of(state, &company_id, &fy_id, "Cash in Hand").await,
        Balance {
            amount: 150.0,
            balance_type: BalanceType::Cr
        }
    );
    assert_eq!(
        balance_of(state, &company_id, &fy_id, "Sales").await,
        Balance {
            amount: 150.0,
            balance_type: BalanceType::Cr
        }
    );
    assert_eq!(
        balance_of(state, &company_id, &fy_id, "Purchase").await,
        Balance {
            amount: 300.0,
            balance_type: BalanceType::Dr
        }
    );

    // Deleting the sale gives its stock back and drops its postings.
    delete_bill(state, &voucher_ctx, VoucherKind::Sales, &sale.id.unwrap())
        .await
        .unwrap();
    assert_eq!(stock_of(state, &company_id, &item_id).await, 110.0);
    assert_eq!(
        balance_of(state, &company_id, &fy_id, "Sales").await,
        Balance::ZERO
    );
    let left = state
        .ledger_entries
        .count_documents(doc! { "voucher_id": sale.id.unwrap() })
        .await
        .unwrap();
    assert_eq!(left, 0);

    common::teardown(ctx).await;
}

#[tokio::test]
async fn overselling_a_batch_is_rejected_without_side_effects() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let Fixture { tenant, item_id } = fixture(state).await;
    let company_id = tenant.company_id();
    let voucher_ctx = tenant.voucher_context();
    let date = tenant.fiscal_year.start_date;

    create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Purchase,
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 20.0)] })),
    )
    .await
    .unwrap();

    let err = create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Sales,
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 25.0)] })),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        domain_error(&err),
        DomainError::InsufficientStock(_)
    ));
    assert_eq!(stock_of(state, &company_id, &item_id).await, 20.0);
    assert!(
        list_bills(state, VoucherKind::Sales, &company_id, &tenant.fiscal_year_id())
            .await
            .unwrap()
            .is_empty()
    );

    // A batch that was never received cannot be sold either.
    let mut unknown = line(&item_id, 1.0);
    unknown["batch_number"] = json!("NOPE");
    let err = create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Sales,
        &bill_input(json!({ "date": date, "lines": [unknown] })),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        domain_error(&err),
        DomainError::InsufficientStock(_)
    ));

    // The next sale still gets the first number.
    let (preview, _) = next_bill_number(
        state,
        &company_id,
        &tenant.fiscal_year_id(),
        VoucherKind::Sales,
    )
    .await
    .unwrap();
    assert_eq!(preview, "SB-0001");

    common::teardown(ctx).await;
}

#[tokio::test]
async fn bill_numbers_increase_and_are_not_reused() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let Fixture { tenant, item_id } = fixture(state).await;
    let voucher_ctx = tenant.voucher_context();
    let date = tenant.fiscal_year.start_date;

    let mut numbers = Vec::new();
    for _ in 0..3 {
        let quotation = create_bill(
            state,
            &voucher_ctx,
            VoucherKind::SalesQuotation,
            &bill_input(json!({ "date": date, "lines": [line(&item_id, 2.0)] })),
        )
        .await
        .unwrap();
        numbers.push(quotation);
    }
    let labels: Vec<&str> = numbers.iter().map(|b| b.bill_number.as_str()).collect();
    assert_eq!(labels, ["SQ-0001", "SQ-0002", "SQ-0003"]);
    // Quotations never touch stock, even for items with none on hand.
    assert_eq!(
        stock_of(state, &tenant.company_id(), &item_id).await,
        0.0
    );

    delete_bill(
        state,
        &voucher_ctx,
        VoucherKind::SalesQuotation,
        &numbers[2].id.unwrap(),
    )
    .await
    .unwrap();
    let next = create_bill(
        state,
        &voucher_ctx,
        VoucherKind::SalesQuotation,
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 1.0)] })),
    )
    .await
    .unwrap();
    assert_eq!(next.bill_number, "SQ-0004");

    common::teardown(ctx).await;
}

#[tokio::test]
async fn editing_a_bill_rebalances_stock() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let Fixture { tenant, item_id } = fixture(state).await;
    let company_id = tenant.company_id();
    let voucher_ctx = tenant.voucher_context();
    let date = tenant.fiscal_year.start_date;

    create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Purchase,
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 50.0)] })),
    )
    .await
    .unwrap();
    let sale = create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Sales,
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 40.0)] })),
    )
    .await
    .unwrap();
    assert_eq!(stock_of(state, &company_id, &item_id).await, 10.0);

    // 40 -> 45 only needs 5 more; the 40 already sold count as available again.
    let updated = update_bill(
        state,
        &voucher_ctx,
        VoucherKind::Sales,
        &sale.id.unwrap(),
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 45.0)] })),
    )
    .await
    .unwrap();
    assert_eq!(updated.bill_number, sale.bill_number);
    assert_eq!(updated.total_amount, 225.0);
    assert_eq!(stock_of(state, &company_id, &item_id).await, 5.0);

    let err = update_bill(
        state,
        &voucher_ctx,
        VoucherKind::Sales,
        &sale.id.unwrap(),
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 60.0)] })),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        domain_error(&err),
        DomainError::InsufficientStock(_)
    ));
    assert_eq!(stock_of(state, &company_id, &item_id).await, 5.0);

    common::teardown(ctx).await;
}

#[tokio::test]
async fn bills_with_returns_cannot_be_deleted() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let Fixture { tenant, item_id } = fixture(state).await;
    let company_id = tenant.company_id();
    let voucher_ctx = tenant.voucher_context();
    let date = tenant.fiscal_year.start_date;

    let purchase = create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Purchase,
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 30.0)] })),
    )
    .await
    .unwrap();
    let purchase_id = purchase.id.unwrap();
    let returned = create_bill(
        state,
        &voucher_ctx,
        VoucherKind::PurchaseReturn,
        &bill_input(json!({
            "date": date,
            "original_bill_id": purchase_id.to_hex(),
            "lines": [line(&item_id, 5.0)],
        })),
    )
    .await
    .unwrap();
    assert_eq!(returned.bill_number, "PR-0001");
    assert_eq!(stock_of(state, &company_id, &item_id).await, 25.0);

    let err = delete_bill(state, &voucher_ctx, VoucherKind::Purchase, &purchase_id)
        .await
        .unwrap_err();
    assert!(matches!(domain_error(&err), DomainError::Conflict(_)));

    // Sales bills cannot point at an original bill.
    let err = create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Sales,
        &bill_input(json!({
            "date": date,
            "original_bill_id": purchase_id.to_hex(),
            "lines": [line(&item_id, 1.0)],
        })),
    )
    .await
    .unwrap_err();
    assert!(matches!(domain_error(&err), DomainError::Validation(_)));

    common::teardown(ctx).await;
}

#[tokio::test]
async fn vouchers_respect_the_fiscal_year_and_balancing_rules() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let Fixture { tenant, item_id } = fixture(state).await;
    let company_id = tenant.company_id();
    let fy_id = tenant.fiscal_year_id();
    let voucher_ctx = tenant.voucher_context();
    let date = tenant.fiscal_year.start_date;
    let cash = default_account(state, &company_id, "Cash in Hand").await.unwrap();
    let capital = default_account(state, &company_id, "Capital").await.unwrap();

    let outside = tenant.fiscal_year.end_date.succ_opt().unwrap();
    let err = create_bill(
        state,
        &voucher_ctx,
        VoucherKind::SalesQuotation,
        &bill_input(json!({ "date": outside, "lines": [line(&item_id, 1.0)] })),
    )
    .await
    .unwrap_err();
    assert!(matches!(domain_error(&err), DomainError::Validation(_)));

    let err = create_journal(
        state,
        &voucher_ctx,
        VoucherKind::Journal,
        &serde_json::from_value(json!({
            "date": date,
            "debit_lines": [{ "account_id": cash.to_hex(), "amount": 100.0 }],
            "credit_lines": [{ "account_id": capital.to_hex(), "amount": 90.0 }],
        }))
        .unwrap(),
    )
    .await
    .unwrap_err();
    assert!(matches!(domain_error(&err), DomainError::Validation(_)));

    let journal = create_journal(
        state,
        &voucher_ctx,
        VoucherKind::CreditNote,
        &serde_json::from_value(json!({
            "date": date,
            "debit_lines": [{ "account_id": cash.to_hex(), "amount": 100.0 }],
            "credit_lines": [{ "account_id": capital.to_hex(), "amount": 100.0 }],
        }))
        .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(journal.bill_number, "CN-0001");

    // Paying 40 out of cash to capital: Dr capital, Cr cash.
    let payment = create_cash_voucher(
        state,
        &voucher_ctx,
        VoucherKind::Payment,
        &serde_json::from_value(json!({
            "date": date,
            "account_id": capital.to_hex(),
            "amount": 40.0,
        }))
        .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(payment.bill_number, "PV-0001");
    assert_eq!(
        balance_of(state, &company_id, &fy_id, "Cash in Hand").await,
        Balance {
            amount: 60.0,
            balance_type: BalanceType::Dr
        }
    );

    let err = create_cash_voucher(
        state,
        &voucher_ctx,
        VoucherKind::Receipt,
        &serde_json::from_value(json!({
            "date": date,
            "account_id": cash.to_hex(),
            "amount": 10.0,
        }))
        .unwrap(),
    )
    .await
    .unwrap_err();
    assert!(matches!(domain_error(&err), DomainError::Validation(_)));

    common::teardown(ctx).await;
}

#[tokio::test]
async fn stock_adjustments_add_and_remove_batches() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let Fixture { tenant, item_id } = fixture(state).await;
    let company_id = tenant.company_id();
    let voucher_ctx = tenant.voucher_context();
    let date = tenant.fiscal_year.start_date;

    let excess = create_stock_adjustment(
        state,
        &voucher_ctx,
        &serde_json::from_value(json!({
            "date": date,
            "adjustment_type": "excess",
            "lines": [line(&item_id, 8.0)],
        }))
        .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(excess.bill_number, "SA-0001");
    assert_eq!(stock_of(state, &company_id, &item_id).await, 8.0);

    let short = create_stock_adjustment(
        state,
        &voucher_ctx,
        &serde_json::from_value(json!({
            "date": date,
            "adjustment_type": "short",
            "lines": [line(&item_id, 3.0)],
        }))
        .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(stock_of(state, &company_id, &item_id).await, 5.0);

    // Removing the excess would leave the short adjustment uncovered.
    let err = delete_stock_adjustment(state, &voucher_ctx, &excess.id.unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        domain_error(&err),
        DomainError::InsufficientStock(_)
    ));

    delete_stock_adjustment(state, &voucher_ctx, &short.id.unwrap())
        .await
        .unwrap();
    delete_stock_adjustment(state, &voucher_ctx, &excess.id.unwrap())
        .await
        .unwrap();
    assert_eq!(stock_of(state, &company_id, &item_id).await, 0.0);

    common::teardown(ctx).await;
}

#[tokio::test]
async fn concurrent_sales_cannot_oversell_a_batch() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let Fixture { tenant, item_id } = fixture(state).await;
    let company_id = tenant.company_id();
    let voucher_ctx = tenant.voucher_context();
    let date = tenant.fiscal_year.start_date;

    create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Purchase,
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 10.0)] })),
    )
    .await
    .unwrap();

    // Each sale fits on its own; together they would need 14 of the 10 on hand.
    let sale = bill_input(json!({ "date": date, "lines": [line(&item_id, 7.0)] }));
    let (first, second) = tokio::join!(
        create_bill(state, &voucher_ctx, VoucherKind::Sales, &sale),
        create_bill(state, &voucher_ctx, VoucherKind::Sales, &sale),
    );
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(
        domain_error(err),
        DomainError::InsufficientStock(_)
    ));

    assert_eq!(stock_of(state, &company_id, &item_id).await, 3.0);
    let item = get_item(state, &company_id, &item_id).await.unwrap().unwrap();
    assert!(item.stock_entries.iter().all(|e| e.quantity >= 0.0));
    assert_eq!(
        list_bills(state, VoucherKind::Sales, &company_id, &tenant.fiscal_year_id())
            .await
            .unwrap()
            .len(),
        1
    );

    common::teardown(ctx).await;
}

#[tokio::test]
async fn concurrent_purchases_into_a_new_batch_share_one_entry() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let Fixture { tenant, item_id } = fixture(state).await;
    let company_id = tenant.company_id();
    let voucher_ctx = tenant.voucher_context();
    let date = tenant.fiscal_year.start_date;

    let five = bill_input(json!({ "date": date, "lines": [line(&item_id, 5.0)] }));
    let seven = bill_input(json!({ "date": date, "lines": [line(&item_id, 7.0)] }));
    let (first, second) = tokio::join!(
        create_bill(state, &voucher_ctx, VoucherKind::Purchase, &five),
        create_bill(state, &voucher_ctx, VoucherKind::Purchase, &seven),
    );
    first.unwrap();
    second.unwrap();

    let item = get_item(state, &company_id, &item_id).await.unwrap().unwrap();
    assert_eq!(item.stock_entries.len(), 1);
    assert_eq!(item.stock_entries[0].quantity, 12.0);

    // The whole batch can be sold in one line.
    create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Sales,
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 12.0)] })),
    )
    .await
    .unwrap();
    assert_eq!(stock_of(state, &company_id, &item_id).await, 0.0);

    common::teardown(ctx).await;
}

#[tokio::test]
async fn round_off_cannot_push_the_bill_below_zero() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let Fixture { tenant, item_id } = fixture(state).await;
    let company_id = tenant.company_id();
    let voucher_ctx = tenant.voucher_context();
    let date = tenant.fiscal_year.start_date;

    create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Purchase,
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 10.0)] })),
    )
    .await
    .unwrap();

    // Two units at 5.0 come to 10.0 before VAT.
    let err = create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Sales,
        &bill_input(json!({
            "date": date,
            "lines": [line(&item_id, 2.0)],
            "round_off": -10.5,
        })),
    )
    .await
    .unwrap_err();
    assert!(matches!(domain_error(&err), DomainError::Validation(_)));
    assert_eq!(stock_of(state, &company_id, &item_id).await, 10.0);

    let sale = create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Sales,
        &bill_input(json!({
            "date": date,
            "lines": [line(&item_id, 2.0)],
            "round_off": -0.5,
        })),
    )
    .await
    .unwrap();
    assert_eq!(sale.total_amount, 9.5);

    common::teardown(ctx).await;
}

#[tokio::test]
async fn failed_posting_rewrite_keeps_the_stored_voucher() {
    let Some(ctx) = common::setup_state().await else {
        return;
    };
    let state = &ctx.state;
    let Fixture { tenant, item_id } = fixture(state).await;
    let company_id = tenant.company_id();
    let fy_id = tenant.fiscal_year_id();
    let voucher_ctx = tenant.voucher_context();
    let date = tenant.fiscal_year.start_date;

    let cash = default_account(state, &company_id, "Cash in Hand").await.unwrap();
    let capital = default_account(state, &company_id, "Capital").await.unwrap();
    let journal_input = |amount: f64| -> JournalInput {
        serde_json::from_value(json!({
            "date": date,
            "debit_lines": [{ "account_id": cash.to_hex(), "amount": amount }],
            "credit_lines": [{ "account_id": capital.to_hex(), "amount": amount }],
        }))
        .unwrap()
    };
    let journal = create_journal(
        state,
        &voucher_ctx,
        VoucherKind::Journal,
        &journal_input(100.0),
    )
    .await
    .unwrap();
    let journal_id = journal.id.unwrap();

    let purchase = create_bill(
        state,
        &voucher_ctx,
        VoucherKind::Purchase,
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 20.0)] })),
    )
    .await
    .unwrap();
    let purchase_id = purchase.id.unwrap();

    // From here on the ledger refuses debits above 1000.
    state
        .db
        .run_command(doc! {
            "collMod": "ledger_entries",
            "validator": { "debit": { "$lte": 1000.0 } },
        })
        .await
        .unwrap();

    update_journal(
        state,
        &voucher_ctx,
        VoucherKind::Journal,
        &journal_id,
        &journal_input(5000.0),
    )
    .await
    .unwrap_err();
    let stored = get_journal(state, VoucherKind::Journal, &company_id, &journal_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.debit_lines[0].amount, 100.0);
    let postings = state
        .ledger_entries
        .count_documents(doc! { "voucher_id": journal_id })
        .await
        .unwrap();
    assert_eq!(postings, 2);
    assert_eq!(
        balance_of(state, &company_id, &fy_id, "Cash in Hand").await,
        Balance {
            amount: 40.0,
            balance_type: BalanceType::Dr
        }
    );

    update_bill(
        state,
        &voucher_ctx,
        VoucherKind::Purchase,
        &purchase_id,
        &bill_input(json!({ "date": date, "lines": [line(&item_id, 1000.0)] })),
    )
    .await
    .unwrap_err();
    let stored = get_bill(state, VoucherKind::Purchase, &company_id, &purchase_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.lines[0].quantity, 20.0);
    assert_eq!(stock_of(state, &company_id, &item_id).await, 20.0);
    assert_eq!(
        balance_of(state, &company_id, &fy_id, "Purchase").await,
        Balance {
            amount: 60.0,
            balance_type: BalanceType::Dr
        }
    );

    common::teardown(ctx).await;
}
