use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::error::{Result, TabulateError};
use crate::interface::ReportInterface;
use crate::ledger::User;
use crate::report::{Report, ReportId, ReportList};
use crate::tabulation::Tabulation;

type Shared = Arc<ReportInterface>;

impl TabulateError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotSignedIn => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Compile(_) | Self::Runtime(_) | Self::ContractViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Persistence(_) | Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TabulateError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::GATEWAY_TIMEOUT {
            error!(error = %self, code = status.as_u16(), "request failed");
        } else {
            warn!(error = %self, code = status.as_u16(), "request refused");
        }
        (status, Json(self.envelope())).into_response()
    }
}

pub fn router(interface: Shared) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);
    Router::new()
        .route("/v1/reports", get(list_reports).post(create_report))
        .route("/v1/reports/:id", get(get_report).put(update_report).delete(delete_report))
        .route("/v1/reports/:id/tabulations", get(tabulate))
        .layer(cors)
        .with_state(interface)
}

fn session_secret(headers: &HeaderMap) -> Result<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|secret| secret.trim().to_string())
        .filter(|secret| !secret.is_empty())
        .ok_or(TabulateError::NotSignedIn)
}

// Malformed ids and bodies still answer with the error envelope.
fn report_id(path: std::result::Result<Path<ReportId>, PathRejection>) -> Result<ReportId> {
    path.map(|Path(id)| id).map_err(|e| TabulateError::Validation(e.body_text()))
}

fn report_body(body: std::result::Result<Json<Report>, JsonRejection>) -> Result<Report> {
    body.map(|Json(report)| report).map_err(|e| TabulateError::Validation(e.body_text()))
}

/// Resolves the session, then runs `work` for that user off the async runtime.
async fn blocking<T, F>(iface: Shared, headers: HeaderMap, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&ReportInterface, &User) -> Result<T> + Send + 'static,
{
    let secret = session_secret(&headers)?;
    tokio::task::spawn_blocking(move || {
        let user = iface.user_for_session(&secret)?;
        work(&iface, &user)
    })
    .await
    .map_err(|e| TabulateError::Internal(format!("join error: {e}")))?
}

async fn list_reports(State(iface): State<Shared>, headers: HeaderMap) -> Result<Json<ReportList>> {
    blocking(iface, headers, |iface, user| iface.reports(user)).await.map(Json)
}

async fn create_report(
    State(iface): State<Shared>,
    headers: HeaderMap,
    body: std::result::Result<Json<Report>, JsonRejection>,
) -> Result<(StatusCode, Json<Report>)> {
    let draft = report_body(body)?;
    let report = blocking(iface, headers, move |iface, user| iface.create_report(user, draft)).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn get_report(
    State(iface): State<Shared>,
    headers: HeaderMap,
    path: std::result::Result<Path<ReportId>, PathRejection>,
) -> Result<Json<Report>> {
    let id = report_id(path)?;
    blocking(iface, headers, move |iface, user| iface.report(user, id)).await.map(Json)
}

async fn update_report(
    State(iface): State<Shared>,
    headers: HeaderMap,
    path: std::result::Result<Path<ReportId>, PathRejection>,
    body: std::result::Result<Json<Report>, JsonRejection>,
) -> Result<Json<Report>> {
    let (id, report) = (report_id(path)?, report_body(body)?);
    blocking(iface, headers, move |iface, user| iface.update_report(user, id, report)).await.map(Json)
}

async fn delete_report(
    State(iface): State<Shared>,
    headers: HeaderMap,
    path: std::result::Result<Path<ReportId>, PathRejection>,
) -> Result<StatusCode> {
    let id = report_id(path)?;
    blocking(iface, headers, move |iface, user| iface.delete_report(user, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn tabulate(
    State(iface): State<Shared>,
    headers: HeaderMap,
    path: std::result::Result<Path<ReportId>, PathRejection>,
) -> Result<Json<Tabulation>> {
    let id = report_id(path)?;
    let started = Instant::now();
    let tabulation = blocking(iface, headers, move |iface, user| iface.tabulate(user, id)).await?;
    let ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(ms, report = id, series = tabulation.series.len(), "tabulation complete");
    Ok(Json(tabulation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContractBreach;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(TabulateError::NotSignedIn.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(TabulateError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(TabulateError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            TabulateError::ContractViolation(ContractBreach::NotAHandle).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(TabulateError::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(TabulateError::Internal("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bearer_secret_is_required() {
        let mut headers = HeaderMap::new();
        assert!(matches!(session_secret(&headers), Err(TabulateError::NotSignedIn)));
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(matches!(session_secret(&headers), Err(TabulateError::NotSignedIn)));
        headers.insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert_eq!(session_secret(&headers).unwrap(), "s3cret");
    }
}
