use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    companies,
    duplicates::{self, FinderConfig},
    error::{StoreError, StoreResult},
    merge,
    models::{CompanyInput, ContactInput, HealthResponse},
    queue,
    repository::{CompanyRepository, ContactRepository},
    store::SqliteStore,
};

pub struct AppState {
    pub store: SqliteStore,
    pub finder: FinderConfig,
}

fn internal_error(msg: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    error!("{}", msg);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": msg.to_string()})),
    )
}

fn not_found(msg: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"error": msg})))
}

fn bad_request(msg: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({"error": msg})))
}

fn conflict(msg: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::CONFLICT, Json(json!({"error": msg})))
}

fn store_error(e: StoreError) -> Response {
    match e {
        StoreError::ContactNotFound(_)
        | StoreError::CompanyNotFound(_)
        | StoreError::MergeNotFound(_) => not_found(&e.to_string()).into_response(),
        StoreError::SelfMerge(_) => bad_request(&e.to_string()).into_response(),
        StoreError::AlreadyQueued { .. } => conflict(&e.to_string()).into_response(),
        other => internal_error(other).into_response(),
    }
}

/// Runs a store call on the blocking pool and folds a panicked task into
/// the store error type.
async fn run_blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {e}")))?
}

// ────────────────────────────────────────────────────────────────────────────
// Routes
// ────────────────────────────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(health))
        // Contacts
        .route("/api/contacts", get(list_contacts).post(create_contact))
        .route(
            "/api/contacts/:id",
            get(get_contact).put(update_contact).delete(delete_contact),
        )
        // Duplicates and merges
        .route("/api/contacts/:id/duplicates", get(find_duplicates))
        .route("/api/contacts/:id/merges", get(list_merges))
        .route("/api/contacts/:id/merge/:duplicate_id", post(queue_merge))
        .route("/api/merges/:id/preview", get(preview_merge))
        .route("/api/merges/:id/dismiss", post(dismiss_merge))
        .route("/api/duplicates/scan", post(scan_participants))
        // Companies
        .route("/api/companies", get(list_companies).post(create_company))
        .route(
            "/api/companies/:id",
            get(get_company).put(update_company).delete(delete_company),
        )
        .route("/api/companies/:id/duplicates", get(find_company_duplicates))
        .route("/api/companies/:id/merges", get(list_company_merges))
        .route("/api/companies/:id/merge/:duplicate_id", post(queue_company_merge))
        .route("/api/company-merges/:id", get(get_company_merge))
        .route("/api/company-merges/:id/dismiss", post(dismiss_company_merge))
        .route("/api/duplicates/companies/scan", post(scan_company_domains))
        .with_state(state)
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
}

pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    let store = state.store.clone();
    match run_blocking(move || store.list_contacts(params.q.as_deref())).await {
        Ok(contacts) => (StatusCode::OK, Json(json!(contacts))).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn get_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.store.clone();
    match run_blocking(move || store.get_contact(id)).await {
        Ok(Some(contact)) => (StatusCode::OK, Json(json!(contact))).into_response(),
        Ok(None) => not_found("contact not found").into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn create_contact(
    State(state): State<Arc<AppState>>,
    Json(input): Json<ContactInput>,
) -> impl IntoResponse {
    if let Err(e) = input.validate() {
        return bad_request(&e).into_response();
    }

    let store = state.store.clone();
    let result = run_blocking(move || {
        let id = store.create_contact(&input)?;
        store.get_contact(id)
    })
    .await;

    match result {
        Ok(Some(contact)) => (StatusCode::CREATED, Json(json!(contact))).into_response(),
        Ok(None) => internal_error("contact created but not found").into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn update_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<ContactInput>,
) -> impl IntoResponse {
    if let Err(e) = input.validate() {
        return bad_request(&e).into_response();
    }

    let store = state.store.clone();
    let result = run_blocking(move || {
        store.update_contact(id, &input)?;
        store.get_contact(id)
    })
    .await;

    match result {
        Ok(Some(contact)) => (StatusCode::OK, Json(json!(contact))).into_response(),
        Ok(None) => not_found("contact not found").into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn delete_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.store.clone();
    match run_blocking(move || store.delete_contact(id)).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("contact not found").into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn find_duplicates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.store.clone();
    let finder = state.finder;

    let result = run_blocking(move || {
        let contact = store.get_contact(id)?.ok_or(StoreError::ContactNotFound(id))?;
        Ok(queue::open_duplicates(&store, &contact, &finder))
    })
    .await;

    match result {
        Ok(scan) => (StatusCode::OK, Json(json!(scan))).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn queue_merge(
    State(state): State<Arc<AppState>>,
    Path((id, duplicate_id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse {
    let store = state.store.clone();
    let result = run_blocking(move || {
        queue::queue_contact_merge(&store, id, duplicate_id, "Queued from duplicate review")
    })
    .await;

    match result {
        Ok(pending) => (StatusCode::CREATED, Json(json!(pending))).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn list_merges(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.store.clone();
    match run_blocking(move || store.pending_merges_for(id)).await {
        Ok(merges) => (StatusCode::OK, Json(json!(merges))).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn preview_merge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.store.clone();
    let result = run_blocking(move || {
        let pending = store.get_merge(id)?.ok_or(StoreError::MergeNotFound(id))?;
        let current = store
            .get_contact(pending.primary_contact_id)?
            .ok_or(StoreError::ContactNotFound(pending.primary_contact_id))?;
        let duplicate = store
            .get_contact(pending.duplicate_contact_id)?
            .ok_or(StoreError::ContactNotFound(pending.duplicate_contact_id))?;
        Ok(merge::preview(pending, &current, &duplicate))
    })
    .await;

    match result {
        Ok(preview) => (StatusCode::OK, Json(json!(preview))).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn dismiss_merge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.store.clone();
    match run_blocking(move || store.dismiss_merge(id)).await {
        Ok(dismissed) => {
            info!(merge_id = %id, "merge dismissed");
            (StatusCode::OK, Json(json!(dismissed))).into_response()
        }
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
pub struct ParticipantScan {
    pub emails: Vec<String>,
}

pub async fn scan_participants(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ParticipantScan>,
) -> impl IntoResponse {
    let store = state.store.clone();
    let finder = state.finder;
    let result = run_blocking(move || {
        Ok(duplicates::find_duplicates_for_participants(&store, &body.emails, &finder))
    })
    .await;

    match result {
        Ok(scan) => {
            if scan.is_partial() {
                warn!(failed = ?scan.failed_signals, "participant scan is partial");
            }
            (StatusCode::OK, Json(json!(scan))).into_response()
        }
        Err(e) => store_error(e),
    }
}

// ─── Companies ──────────────────────────────────────────────────────────────

pub async fn list_companies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    let store = state.store.clone();
    match run_blocking(move || store.list_companies(params.q.as_deref())).await {
        Ok(companies) => (StatusCode::OK, Json(json!(companies))).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn get_company(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.store.clone();
    match run_blocking(move || store.get_company(id)).await {
        Ok(Some(company)) => (StatusCode::OK, Json(json!(company))).into_response(),
        Ok(None) => not_found("company not found").into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn create_company(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CompanyInput>,
) -> impl IntoResponse {
    if let Err(e) = input.validate() {
        return bad_request(&e).into_response();
    }

    let store = state.store.clone();
    let result = run_blocking(move || {
        let id = store.create_company(&input)?;
        store.get_company(id)
    })
    .await;

    match result {
        Ok(Some(company)) => (StatusCode::CREATED, Json(json!(company))).into_response(),
        Ok(None) => internal_error("company created but not found").into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn update_company(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<CompanyInput>,
) -> impl IntoResponse {
    if let Err(e) = input.validate() {
        return bad_request(&e).into_response();
    }

    let store = state.store.clone();
    let result = run_blocking(move || {
        store.update_company(id, &input)?;
        store.get_company(id)
    })
    .await;

    match result {
        Ok(Some(company)) => (StatusCode::OK, Json(json!(company))).into_response(),
        Ok(None) => not_found("company not found").into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn delete_company(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.store.clone();
    match run_blocking(move || store.delete_company(id)).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("company not found").into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn find_company_duplicates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.store.clone();
    let finder = state.finder;

    let result = run_blocking(move || {
        let company = store.get_company(id)?.ok_or(StoreError::CompanyNotFound(id))?;
        Ok(queue::company_duplicates(&store, &company, &finder))
    })
    .await;

    match result {
        Ok(scan) => (StatusCode::OK, Json(json!(scan))).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn queue_company_merge(
    State(state): State<Arc<AppState>>,
    Path((id, duplicate_id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse {
    let store = state.store.clone();
    let result = run_blocking(move || {
        queue::queue_company_merge(&store, id, duplicate_id, "Queued from duplicate review")
    })
    .await;

    match result {
        Ok(pending) => (StatusCode::CREATED, Json(json!(pending))).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn list_company_merges(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.store.clone();
    match run_blocking(move || store.pending_company_merges_for(id)).await {
        Ok(merges) => (StatusCode::OK, Json(json!(merges))).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn get_company_merge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.store.clone();
    match run_blocking(move || store.get_company_merge(id)).await {
        Ok(Some(merge)) => (StatusCode::OK, Json(json!(merge))).into_response(),
        Ok(None) => not_found("merge not found").into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn dismiss_company_merge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let store = state.store.clone();
    match run_blocking(move || store.dismiss_company_merge(id)).await {
        Ok(dismissed) => {
            info!(merge_id = %id, "company merge dismissed");
            (StatusCode::OK, Json(json!(dismissed))).into_response()
        }
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
pub struct DomainScan {
    pub domains: Vec<String>,
}

pub async fn scan_company_domains(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DomainScan>,
) -> impl IntoResponse {
    let store = state.store.clone();
    let finder = state.finder;
    let result = run_blocking(move || {
        Ok(companies::find_company_duplicates_for_domains(&store, &body.domains, &finder))
    })
    .await;

    match result {
        Ok(scan) => {
            if scan.is_partial() {
                warn!(failed = ?scan.failed_signals, "company domain scan is partial");
            }
            (StatusCode::OK, Json(json!(scan))).into_response()
        }
        Err(e) => store_error(e),
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.store.clone();
    let db_ok = tokio::task::spawn_blocking(move || store.ping())
        .await
        .unwrap_or(false);

    let resp = HealthResponse {
        status: "ok".to_string(),
        db: if db_ok { "ok".to_string() } else { "error".to_string() },
    };
    (StatusCode::OK, Json(json!(resp)))
}
