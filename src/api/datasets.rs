//! Dataset API endpoints
//!
//! All routes require authentication. Ownership checks live in
//! [`DatasetService`](crate::services::DatasetService).

use axum::{
    extract::State,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;

use crate::api::common::{non_empty, parse_flag, Json, PaginationQuery, Path, Query};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ApiResponse, Listing};
use crate::models::{
    CreateDatasetInput, DataRecord, DataRecordFilter, Dataset, DatasetFilter, DatasetStatus,
    DatasetType, DatasetWithMeta, NewDataRecord, RequestContext, UpdateDatasetInput,
};
use crate::services::dataset::{DatasetDetail, ProcessingQueued, RecordsAdded};
use crate::services::AuditAction;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_dataset).get(list_datasets))
        .route(
            "/{id}",
            get(get_dataset).put(update_dataset).delete(delete_dataset),
        )
        .route("/{id}/records", post(add_records).get(list_records))
        .route("/{id}/records/{recordId}/verify", put(verify_record))
        .route("/{id}/process", post(process_dataset))
}

async fn create_dataset(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ctx: RequestContext,
    Json(input): Json<CreateDatasetInput>,
) -> Result<ApiResponse<DatasetWithMeta>, ApiError> {
    let dataset = state.dataset_service.create(&user, input).await?;

    state
        .audit_service
        .log(
            AuditAction::CreateDataset
                .entry()
                .user(Some(user.id))
                .resource(dataset.dataset.id)
                .request(&ctx)
                .metadata(json!({
                    "name": dataset.dataset.name,
                    "type": dataset.dataset.dataset_type,
                })),
        )
        .await;

    Ok(ApiResponse::created(dataset, "Dataset created successfully"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDatasetsQuery {
    page: Option<u32>,
    limit: Option<u32>,
    #[serde(rename = "type")]
    dataset_type: Option<String>,
    status: Option<String>,
    created_by: Option<i64>,
    own: Option<String>,
}

async fn list_datasets(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<ListDatasetsQuery>,
) -> Result<ApiResponse<Listing<DatasetWithMeta>>, ApiError> {
    let dataset_type = match non_empty(query.dataset_type) {
        Some(raw) => Some(
            DatasetType::from_str(&raw)
                .map_err(|_| ApiError::validation_error("Invalid dataset type."))?,
        ),
        None => None,
    };
    let status = match non_empty(query.status) {
        Some(raw) => Some(
            DatasetStatus::from_str(&raw)
                .map_err(|_| ApiError::validation_error("Invalid dataset status."))?,
        ),
        None => None,
    };
    let filter = DatasetFilter {
        dataset_type,
        status,
        created_by: query.created_by,
    };
    let own = parse_flag(query.own.as_deref()).unwrap_or(false);
    let params = PaginationQuery { page: query.page, limit: query.limit }.params(10);

    let page = state.dataset_service.list(&user, filter, own, &params).await?;
    Ok(ApiResponse::ok(
        Listing::new("datasets", page),
        "Datasets retrieved successfully",
    ))
}

async fn get_dataset(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<ApiResponse<DatasetDetail>, ApiError> {
    let detail = state.dataset_service.get(&user, id).await?;
    Ok(ApiResponse::ok(detail, "Dataset retrieved successfully"))
}

async fn update_dataset(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    ctx: RequestContext,
    Json(input): Json<UpdateDatasetInput>,
) -> Result<ApiResponse<Dataset>, ApiError> {
    let changes = json!({
        "name": input.name,
        "description": input.description,
        "status": input.status,
    });
    let dataset = state.dataset_service.update(&user, id, input).await?;

    state
        .audit_service
        .log(
            AuditAction::UpdateDataset
                .entry()
                .user(Some(user.id))
                .resource(id)
                .request(&ctx)
                .metadata(changes),
        )
        .await;

    Ok(ApiResponse::ok(dataset, "Dataset updated successfully"))
}

async fn delete_dataset(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    ctx: RequestContext,
) -> Result<ApiResponse<Option<()>>, ApiError> {
    let dataset = state.dataset_service.delete(&user, id).await?;

    state
        .audit_service
        .log(
            AuditAction::DeleteDataset
                .entry()
                .user(Some(user.id))
                .resource(id)
                .request(&ctx)
                .metadata(json!({
                    "name": dataset.name,
                    "totalRecords": dataset.total_records,
                })),
        )
        .await;

    Ok(ApiResponse::ok(None, "Dataset deleted successfully"))
}

#[derive(Debug, Default, Deserialize)]
struct AddRecordsRequest {
    #[serde(default)]
    records: Vec<NewDataRecord>,
}

async fn add_records(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<AddRecordsRequest>,
) -> Result<ApiResponse<RecordsAdded>, ApiError> {
    let added = state.dataset_service.add_records(&user, id, body.records).await?;
    let message = format!("{} records added successfully", added.created_count);
    Ok(ApiResponse::created(added, message))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRecordsQuery {
    page: Option<u32>,
    limit: Option<u32>,
    is_processed: Option<String>,
    has_errors: Option<String>,
    is_verified: Option<String>,
}

async fn list_records(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Query(query): Query<ListRecordsQuery>,
) -> Result<ApiResponse<Listing<DataRecord>>, ApiError> {
    let filter = DataRecordFilter {
        is_processed: parse_flag(query.is_processed.as_deref()),
        has_errors: parse_flag(query.has_errors.as_deref()),
        is_verified: parse_flag(query.is_verified.as_deref()),
    };
    let params = PaginationQuery { page: query.page, limit: query.limit }.params(20);

    let page = state
        .dataset_service
        .list_records(&user, id, &filter, &params)
        .await?;
    Ok(ApiResponse::ok(
        Listing::new("records", page),
        "Data records retrieved successfully",
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRecordRequest {
    manual_code_id: Option<i64>,
    is_verified: Option<bool>,
}

async fn verify_record(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path((id, record_id)): Path<(i64, i64)>,
    Json(body): Json<VerifyRecordRequest>,
) -> Result<ApiResponse<DataRecord>, ApiError> {
    let record = state
        .dataset_service
        .verify_record(&user, id, record_id, body.manual_code_id, body.is_verified)
        .await?;
    Ok(ApiResponse::ok(record, "Data record verified successfully"))
}

async fn process_dataset(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    ctx: RequestContext,
) -> Result<ApiResponse<ProcessingQueued>, ApiError> {
    let queued = state.dataset_service.process(&user, id).await?;

    state
        .audit_service
        .log(
            AuditAction::ProcessDataset
                .entry()
                .user(Some(user.id))
                .resource(id)
                .request(&ctx)
                .metadata(json!({ "totalRecords": queued.total_records })),
        )
        .await;

    Ok(ApiResponse::ok(queued, "Dataset queued for AI processing"))
}
