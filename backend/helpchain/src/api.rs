//! Axum REST API handlers.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{FromRequest, FromRequestParts, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::Caller;
use crate::config::Config;
use crate::errors::{AppError, Result};
use crate::ledger::ChainMirror;
use crate::models::{
    AidPackage, CloseDeliveryRequest, ConfirmRequest, CreatePackageRequest, Delivery,
    DeliveryResponse, DeliveryTimeline, Donation, DonationRequest, DonationResponse,
    ListPackagesQuery, PackageResponse, PackagesPage, PledgeRequest, ReconciliationReport,
    StatusUpdateRequest, UpdatePackageRequest, VerificationCodeResponse,
};
use crate::types::DeliveryStatus;
use crate::verification::CodePolicy;
use crate::{deliveries, donations, packages};

/// Everything a request needs: the database, the chain mirror and settings.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub mirror: ChainMirror,
    pub config: Config,
}

impl AppState {
    pub fn code_policy(&self) -> CodePolicy {
        CodePolicy {
            ttl: self.config.otp_ttl,
            max_attempts: self.config.otp_max_attempts,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Extractors
// ─────────────────────────────────────────────────────────

const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// JSON body whose rejections become `validation` errors.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

impl<T: Serialize> IntoResponse for AppJson<T> {
    fn into_response(self) -> Response {
        Json(self.0).into_response()
    }
}

/// Query string whose rejections become `validation` errors.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

/// JSON body that may be left out: an empty body means the defaults.
///
/// A body that is present must be well-formed JSON with a JSON content type;
/// anything else is rejected like [`AppJson`] would.
pub struct OptionalJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for OptionalJson<T>
where
    T: DeserializeOwned + Default + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let (parts, body) = req.into_parts();
        let bytes = axum::body::to_bytes(body, BODY_LIMIT)
            .await
            .map_err(|e| AppError::validation("body", e.to_string()))?;
        if bytes.is_empty() {
            return Ok(Self(T::default()));
        }
        let req = Request::from_parts(parts, Body::from(bytes));
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

// ─────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/aid-packages", post(create_package).get(list_packages))
        .route(
            "/aid-packages/:id",
            get(get_package).put(update_package).delete(cancel_package),
        )
        .route("/aid-packages/ngo/:ngo_id", get(ngo_packages))
        .route("/aid-packages/:id/ledger/retry", post(retry_package_ledger))
        .route("/aid-packages/:id/reconciliation", get(package_reconciliation))
        .route("/donations/:package_id", post(donate))
        .route("/donations/package/:package_id", get(package_donations))
        .route("/donations/donor/:donor_id", get(donor_donations))
        .route("/deliveries/available", get(available_packages))
        .route("/deliveries/mine", get(my_deliveries))
        .route("/deliveries/package/:package_id", get(delivery_timeline))
        .route("/deliveries/pledge/:package_id", post(pledge_delivery))
        .route("/deliveries/status/:package_id", patch(update_delivery_status))
        .route("/deliveries/confirm/:package_id", post(confirm_delivery))
        .route("/deliveries/otp/:package_id", post(issue_verification_code))
        .route("/deliveries/fail/:package_id", post(fail_delivery))
        .route("/deliveries/cancel/:package_id", post(cancel_delivery))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub ledger: &'static str,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        ledger: if state.config.ledger_rpc_url.is_some() {
            "enabled"
        } else {
            "disabled"
        },
    })
}

/// `POST /aid-packages`
pub async fn create_package(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    AppJson(req): AppJson<CreatePackageRequest>,
) -> Result<(StatusCode, AppJson<PackageResponse>)> {
    let resp = packages::create(&state, &caller, req).await?;
    Ok((StatusCode::CREATED, AppJson(resp)))
}

/// `GET /aid-packages?status=&item_type=&urgency_level=&city=&country=&search=&sort_by=&sort_order=&page=&limit=`
pub async fn list_packages(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    AppQuery(query): AppQuery<ListPackagesQuery>,
) -> Result<AppJson<PackagesPage>> {
    Ok(AppJson(packages::list(&state, query).await?))
}

/// `GET /aid-packages/ngo/:ngo_id`
pub async fn ngo_packages(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(ngo_id): Path<String>,
    AppQuery(query): AppQuery<ListPackagesQuery>,
) -> Result<AppJson<PackagesPage>> {
    Ok(AppJson(packages::list_for_ngo(&state, &ngo_id, query).await?))
}

/// `GET /aid-packages/:id`
pub async fn get_package(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(id): Path<String>,
) -> Result<AppJson<AidPackage>> {
    Ok(AppJson(packages::load(&state, &id).await?))
}

/// `PUT /aid-packages/:id`
pub async fn update_package(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdatePackageRequest>,
) -> Result<AppJson<AidPackage>> {
    Ok(AppJson(packages::update(&state, &caller, &id, req).await?))
}

/// `DELETE /aid-packages/:id`
pub async fn cancel_package(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<AppJson<AidPackage>> {
    Ok(AppJson(packages::cancel(&state, &caller, &id).await?))
}

/// `POST /aid-packages/:id/ledger/retry`
pub async fn retry_package_ledger(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<AppJson<PackageResponse>> {
    Ok(AppJson(packages::retry_ledger(&state, &caller, &id).await?))
}

/// `GET /aid-packages/:id/reconciliation`
pub async fn package_reconciliation(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(id): Path<String>,
) -> Result<AppJson<ReconciliationReport>> {
    Ok(AppJson(packages::reconciliation(&state, &id).await?))
}

/// `POST /donations/:package_id`
pub async fn donate(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(package_id): Path<String>,
    AppJson(req): AppJson<DonationRequest>,
) -> Result<(StatusCode, AppJson<DonationResponse>)> {
    let resp = donations::record(&state, &caller, &package_id, req).await?;
    Ok((StatusCode::CREATED, AppJson(resp)))
}

/// `GET /donations/package/:package_id`
pub async fn package_donations(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(package_id): Path<String>,
) -> Result<AppJson<Vec<Donation>>> {
    Ok(AppJson(
        donations::list_for_package(&state, &package_id).await?,
    ))
}

/// `GET /donations/donor/:donor_id`
pub async fn donor_donations(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(donor_id): Path<String>,
) -> Result<AppJson<Vec<Donation>>> {
    Ok(AppJson(
        donations::list_for_donor(&state, &caller, &donor_id).await?,
    ))
}

/// `GET /deliveries/available`
pub async fn available_packages(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<AppJson<Vec<AidPackage>>> {
    Ok(AppJson(deliveries::available(&state, &caller).await?))
}

/// `GET /deliveries/mine`
pub async fn my_deliveries(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<AppJson<Vec<Delivery>>> {
    Ok(AppJson(deliveries::mine(&state, &caller).await?))
}

/// `GET /deliveries/package/:package_id`
pub async fn delivery_timeline(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(package_id): Path<String>,
) -> Result<AppJson<DeliveryTimeline>> {
    Ok(AppJson(deliveries::timeline(&state, &package_id).await?))
}

/// `POST /deliveries/pledge/:package_id`
pub async fn pledge_delivery(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(package_id): Path<String>,
    OptionalJson(req): OptionalJson<PledgeRequest>,
) -> Result<(StatusCode, AppJson<DeliveryResponse>)> {
    let resp = deliveries::pledge(&state, &caller, &package_id, req).await?;
    Ok((StatusCode::CREATED, AppJson(resp)))
}

/// `PATCH /deliveries/status/:package_id`
pub async fn update_delivery_status(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(package_id): Path<String>,
    AppJson(req): AppJson<StatusUpdateRequest>,
) -> Result<AppJson<DeliveryResponse>> {
    Ok(AppJson(
        deliveries::advance(&state, &caller, &package_id, req).await?,
    ))
}

/// `POST /deliveries/confirm/:package_id`
pub async fn confirm_delivery(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(package_id): Path<String>,
    AppJson(req): AppJson<ConfirmRequest>,
) -> Result<AppJson<DeliveryResponse>> {
    Ok(AppJson(
        deliveries::confirm(&state, &caller, &package_id, req).await?,
    ))
}

/// `POST /deliveries/otp/:package_id`
pub async fn issue_verification_code(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(package_id): Path<String>,
) -> Result<(StatusCode, AppJson<VerificationCodeResponse>)> {
    let resp = deliveries::issue_code(&state, &caller, &package_id).await?;
    Ok((StatusCode::CREATED, AppJson(resp)))
}

/// `POST /deliveries/fail/:package_id`
pub async fn fail_delivery(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(package_id): Path<String>,
    OptionalJson(req): OptionalJson<CloseDeliveryRequest>,
) -> Result<AppJson<DeliveryResponse>> {
    Ok(AppJson(
        deliveries::close(
            &state,
            &caller,
            &package_id,
            DeliveryStatus::Failed,
            req,
        )
        .await?,
    ))
}

/// `POST /deliveries/cancel/:package_id`
pub async fn cancel_delivery(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(package_id): Path<String>,
    OptionalJson(req): OptionalJson<CloseDeliveryRequest>,
) -> Result<AppJson<DeliveryResponse>> {
    Ok(AppJson(
        deliveries::close(
            &state,
            &caller,
            &package_id,
            DeliveryStatus::Cancelled,
            req,
        )
        .await?,
    ))
}

// ─────────────────────────────────────────────────────────
// HTTP tests
// ─────────────────────────────────────────────────────────
