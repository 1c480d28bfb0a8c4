// lib.rs
// Multi-tenant pharmacy accounting API: companies, fiscal years, chart of accounts,
// batch-tracked inventory and vouchers, served over axum with MongoDB storage.

pub mod batches;
pub mod billing;
pub mod config;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod models;
pub mod routes;
pub mod session;
pub mod state;
pub mod totp;
