// routes/mod.rs
// Route handlers and the API router.
//
// Public:
// - GET  /api/health, POST /api/login
// Behind a session:
// - POST /api/logout, GET /api/me, /api/setup, /api/qrcode
// - /api/users (admin), /api/company/*, POST /api/switch/{id}
// Behind a session with an active company:
// - /api/fiscal-years/*, /api/account-groups/*, /api/accounts/*
// - /api/units, /api/main-units, /api/categories, /api/items-companies
// - /api/stores, /api/racks, /api/items, /api/stock/expiring, /api/opening-stock
// - one router per voucher kind (/api/sales-bills ... /api/stock-adjustments)

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
};
use mongodb::bson::oid::ObjectId;
use serde::Serialize;
use serde_json::{Value, json};

use crate::models::VoucherKind;
use crate::session::{require_company, require_session};
use crate::state::{AppState, Lookup};

pub mod accounts;
pub mod company;
pub mod fiscal_years;
pub mod health;
pub mod inventory;
pub mod login;
pub mod logout;
pub mod qrcode;
pub mod setup;
pub mod users;
pub mod vouchers;

/// `{"success": true, "data": ...}`
pub(crate) fn success<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

pub(crate) fn created(id: ObjectId) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, Json(json!({ "success": true, "id": id })))
}

pub fn router(state: Arc<AppState>) -> Router {
    let tenant = Router::new()
        .route("/api/fiscal-years", get(fiscal_years::fiscal_years_index))
        .route("/api/fiscal-years/next", post(fiscal_years::fiscal_years_next))
        .route(
            "/api/fiscal-years/switch/{id}",
            post(fiscal_years::fiscal_years_switch),
        )
        .route(
            "/api/account-groups",
            get(accounts::groups_index).post(accounts::groups_create),
        )
        .route(
            "/api/account-groups/{id}",
            get(accounts::groups_show)
                .put(accounts::groups_update)
                .delete(accounts::groups_delete),
        )
        .route(
            "/api/accounts",
            get(accounts::accounts_index).post(accounts::accounts_create),
        )
        .route(
            "/api/accounts/{id}",
            get(accounts::accounts_show)
                .put(accounts::accounts_update)
                .delete(accounts::accounts_delete),
        )
        .route("/api/accounts/{id}/balance", get(accounts::accounts_balance))
        .route(
            "/api/accounts/{id}/balance/projection",
            get(accounts::accounts_projection),
        )
        .route(
            "/api/accounts/{id}/statement",
            get(accounts::accounts_statement),
        )
        .nest("/api/units", inventory::lookup_routes(Lookup::Unit))
        .nest("/api/main-units", inventory::lookup_routes(Lookup::MainUnit))
        .nest("/api/categories", inventory::lookup_routes(Lookup::Category))
        .nest(
            "/api/items-companies",
            inventory::lookup_routes(Lookup::ItemsCompany),
        )
        .route(
            "/api/stores",
            get(inventory::stores_index).post(inventory::stores_create),
        )
        .route(
            "/api/stores/{id}",
            get(inventory::stores_show)
                .put(inventory::stores_update)
                .delete(inventory::stores_delete),
        )
        .route(
            "/api/racks",
            get(inventory::racks_index).post(inventory::racks_create),
        )
        .route(
            "/api/racks/{id}",
            get(inventory::racks_show)
                .put(inventory::racks_update)
                .delete(inventory::racks_delete),
        )
        .route(
            "/api/items",
            get(inventory::items_index).post(inventory::items_create),
        )
        .route(
            "/api/items/{id}",
            get(inventory::items_show)
                .put(inventory::items_update)
                .delete(inventory::items_delete),
        )
        .route("/api/items/{id}/batches", get(inventory::items_batches))
        .route("/api/stock/expiring", get(inventory::stock_expiring))
        .route(
            "/api/opening-stock",
            get(inventory::opening_stock_index).post(inventory::opening_stock_create),
        )
        .route(
            "/api/opening-stock/{id}",
            delete(inventory::opening_stock_delete),
        )
        .nest("/api/sales-bills", vouchers::bill_routes(VoucherKind::Sales))
        .nest(
            "/api/sales-returns",
            vouchers::bill_routes(VoucherKind::SalesReturn),
        )
        .nest(
            "/api/purchase-bills",
            vouchers::bill_routes(VoucherKind::Purchase),
        )
        .nest(
            "/api/purchase-returns",
            vouchers::bill_routes(VoucherKind::PurchaseReturn),
        )
        .nest(
            "/api/sales-quotations",
            vouchers::bill_routes(VoucherKind::SalesQuotation),
        )
        .nest("/api/payments", vouchers::cash_routes(VoucherKind::Payment))
        .nest("/api/receipts", vouchers::cash_routes(VoucherKind::Receipt))
        .nest("/api/journals", vouchers::journal_routes(VoucherKind::Journal))
        .nest(
            "/api/credit-notes",
            vouchers::journal_routes(VoucherKind::CreditNote),
        )
        .nest(
            "/api/debit-notes",
            vouchers::journal_routes(VoucherKind::DebitNote),
        )
        .nest("/api/stock-adjustments", vouchers::adjustment_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_company,
        ));

    let protected = Router::new()
        .route("/api/logout", post(logout::logout))
        .route("/api/me", get(setup::me))
        .route("/api/setup", get(setup::setup))
        .route("/api/qrcode", get(qrcode::qrcode))
        .route(
            "/api/users",
            get(users::users_index).post(users::users_create),
        )
        .route("/api/company", get(company::companies_index))
        .route("/api/company/new", post(company::companies_create))
        .route(
            "/api/company/{id}",
            get(company::companies_show).delete(company::companies_delete),
        )
        .route("/api/company/edit/{id}", put(company::companies_update))
        .route("/api/switch/{id}", post(company::switch_company))
        .merge(tenant)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/login", post(login::login))
        .merge(protected)
        .with_state(state)
}
