#![allow(dead_code)]

use std::{
    env,
    sync::{Mutex, MutexGuard, OnceLock},
    time::{SystemTime, UNIX_EPOCH},
};

use mongodb::{Client, bson::oid::ObjectId};

use pharmaledger::models::{Company, FiscalYear};
use pharmaledger::state::{
    AppState, CompanyInput, VoucherContext, create_company, find_user, get_company_by_id,
    get_fiscal_year, init_state,
};

pub const ADMIN_EMAIL: &str = "admin@pharmaledger.local";
pub const ADMIN_SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";

/// Global lock so integration tests that mutate the DB run one-at-a-time.
static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestContext {
    pub state: AppState,
    pub db_name: String,
    _guard: MutexGuard<'static, ()>,
}

pub async fn setup_state() -> Option<TestContext> {
    let guard = TEST_DB_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let uri = env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    let db_name = format!(
        "pharmaledgertest_{}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis()
    );
    unsafe {
        env::set_var("MONGODB_DB", &db_name);
    }

    let client = match Client::with_uri_str(&uri).await {
        Ok(c) => c,
        Err(err) => {
            eprintln!("Skipping test; cannot connect to MongoDB: {err:?}");
            return None;
        }
    };
    if let Err(err) = client.database(&db_name).drop().await {
        eprintln!("Skipping test; cannot drop test DB: {err:?}");
        return None;
    }

    match init_state().await {
        Ok(state) => Some(TestContext {
            state,
            db_name,
            _guard: guard,
        }),
        Err(err) => {
            eprintln!("Skipping test; init_state failed: {err:?}");
            None
        }
    }
}

pub async fn teardown(ctx: TestContext) {
    let _ = ctx.state.db.drop().await;
    drop(ctx);
}

pub async fn admin_id(state: &AppState) -> ObjectId {
    find_user(state, ADMIN_EMAIL)
        .await
        .unwrap()
        .expect("seeded admin user")
        .id
}

pub fn company_input(name: &str) -> CompanyInput {
    serde_json::from_value(serde_json::json!({ "name": name })).unwrap()
}

/// A fresh company owned by the seeded admin, with its first fiscal year.
pub struct Tenant {
    pub company: Company,
    pub fiscal_year: FiscalYear,
    pub user_id: ObjectId,
}

impl Tenant {
    pub fn company_id(&self) -> ObjectId {
        self.company.id.unwrap()
    }

    pub fn fiscal_year_id(&self) -> ObjectId {
        self.fiscal_year.id.unwrap()
    }

    pub fn voucher_context(&self) -> VoucherContext {
        VoucherContext::new(&self.company, &self.fiscal_year, self.user_id).unwrap()
    }
}

pub async fn create_tenant(state: &AppState, name: &str) -> Tenant {
    let user_id = admin_id(state).await;
    let created = create_company(state, &user_id, &company_input(name))
        .await
        .unwrap();
    let company = get_company_by_id(state, &created.company_id)
        .await
        .unwrap()
        .unwrap();
    let fiscal_year = get_fiscal_year(state, &created.company_id, &created.fiscal_year_id)
        .await
        .unwrap()
        .unwrap();
    Tenant {
        company,
        fiscal_year,
        user_id,
    }
}
