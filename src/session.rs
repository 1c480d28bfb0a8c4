// session.rs
// Session middleware guarding the API, the company guard for tenant data, and
// extractors handing both to handlers.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header::COOKIE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use mongodb::bson::oid::ObjectId;
use tracing::error;

use crate::error::{ApiError, ApiResult};
use crate::models::{Company, FiscalYear};
use crate::state::{
    ActiveUser, AppState, VoucherContext, find_user_by_session, get_company_by_id,
    get_fiscal_year, latest_fiscal_year,
};

pub const SESSION_COOKIE_NAME: &str = "session";

#[derive(Clone)]
pub struct SessionData {
    pub user: ActiveUser,
    pub token: String,
}

/// The company and fiscal year the current session works in.
#[derive(Clone)]
pub struct CompanyData {
    pub company: Company,
    pub fiscal_year: FiscalYear,
}

pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let tokens = extract_cookies(request.headers(), SESSION_COOKIE_NAME);
    if tokens.is_empty() {
        return Err(ApiError::Unauthorized.into_response());
    }

    // Several cookies may carry the name; the first live one wins.
    for token in tokens {
        match find_user_by_session(&state, &token).await {
            Ok(Some(user)) => {
                request.extensions_mut().insert(SessionData { user, token });
                return Ok(next.run(request).await);
            }
            Ok(None) => continue,
            Err(err) => return Err(ApiError::Internal(err).into_response()),
        }
    }
    Err(ApiError::Unauthorized.into_response())
}

/// Runs behind `require_session`. Rejects requests whose session has no active
/// company, then resolves the company and its fiscal year (the session's choice,
/// or the latest one).
pub async fn require_company(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let session = request
        .extensions()
        .get::<SessionData>()
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized.into_response())?;
    let data = resolve_company(&state, &session.user)
        .await
        .map_err(IntoResponse::into_response)?;
    request.extensions_mut().insert(data);
    Ok(next.run(request).await)
}

async fn resolve_company(state: &AppState, user: &ActiveUser) -> ApiResult<CompanyData> {
    let no_company = || ApiError::bad_request("no company selected");
    let company_id = user.company_id.ok_or_else(no_company)?;
    if !user.can_access(&company_id) {
        return Err(ApiError::Forbidden);
    }
    let company = get_company_by_id(state, &company_id)
        .await?
        .ok_or_else(no_company)?;

    let selected = match user.fiscal_year_id {
        Some(id) => get_fiscal_year(state, &company_id, &id).await?,
        None => None,
    };
    let fiscal_year = match selected {
        Some(fy) => fy,
        None => latest_fiscal_year(state, &company_id).await?.ok_or_else(|| {
            error!(company_id = %company_id, "company has no fiscal year");
            ApiError::bad_request("company has no fiscal year")
        })?,
    };
    Ok(CompanyData {
        company,
        fiscal_year,
    })
}

pub struct SessionUser(pub SessionData);

impl SessionUser {
    pub fn user(&self) -> &ActiveUser {
        &self.0.user
    }

    pub fn token(&self) -> &str {
        &self.0.token
    }

    pub fn user_id(&self) -> &ObjectId {
        &self.0.user.id
    }

    pub fn is_admin(&self) -> bool {
        self.0.user.role.is_admin()
    }
}

#[allow(refining_impl_trait)]
impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> BoxFuture<'static, Result<Self, Self::Rejection>> {
        let data = parts
            .extensions
            .get::<SessionData>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized.into_response());

        Box::pin(async move { data.map(SessionUser) })
    }
}

/// Session plus the active company; only available behind `require_company`.
pub struct CompanyContext {
    pub session: SessionData,
    pub company: Company,
    pub fiscal_year: FiscalYear,
}

impl CompanyContext {
    pub fn company_id(&self) -> ApiResult<ObjectId> {
        self.company
            .id
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("company missing _id")))
    }

    pub fn fiscal_year_id(&self) -> ApiResult<ObjectId> {
        self.fiscal_year
            .id
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("fiscal year missing _id")))
    }

    pub fn voucher_context(&self) -> ApiResult<VoucherContext> {
        Ok(VoucherContext::new(
            &self.company,
            &self.fiscal_year,
            self.session.user.id,
        )?)
    }
}

#[allow(refining_impl_trait)]
impl<S> FromRequestParts<S> for CompanyContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> BoxFuture<'static, Result<Self, Self::Rejection>> {
        let session = parts.extensions.get::<SessionData>().cloned();
        let company = parts.extensions.get::<CompanyData>().cloned();

        Box::pin(async move {
            let session = session.ok_or_else(|| ApiError::Unauthorized.into_response())?;
            let company = company
                .ok_or_else(|| ApiError::bad_request("no company selected").into_response())?;
            Ok(CompanyContext {
                session,
                company: company.company,
                fiscal_year: company.fiscal_year,
            })
        })
    }
}

pub fn extract_cookies(headers: &HeaderMap, name: &str) -> Vec<String> {
    headers
        .get_all(COOKIE)
        .into_iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let mut split = pair.trim().splitn(2, '=');
            let key = split.next()?.trim();
            let value = split.next()?.trim();
            if key == name {
                Some(value.to_owned())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn picks_every_cookie_with_the_name() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; session=abc"));
        headers.append(COOKIE, HeaderValue::from_static("session=def"));
        assert_eq!(extract_cookies(&headers, SESSION_COOKIE_NAME), vec!["abc", "def"]);
        assert!(extract_cookies(&headers, "missing").is_empty());
    }
}
