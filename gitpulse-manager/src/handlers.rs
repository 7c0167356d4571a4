use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use gitpulse_model::{
    AuthorStats, CommitPage, Intent, IntentFilter, IntentStatus, Paginated, Pagination,
    Repository,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{AppState, errors::AppResult};

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn pagination(page: Option<u32>, per_page: Option<u32>) -> Pagination {
    Pagination::new(page.unwrap_or(1), per_page.unwrap_or(10))
}

#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub repository: String,
    /// Harvest window start, `YYYY-MM-DD`.
    pub since: NaiveDate,
}

pub async fn create_intent_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateIntentRequest>,
) -> AppResult<(StatusCode, Json<Intent>)> {
    let intent = state
        .service
        .create_intent(&request.repository, midnight_utc(request.since))
        .await?;
    info!(intent = %intent.id, repo = %intent.repository_name, "intent created");
    Ok((StatusCode::CREATED, Json(intent)))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateIntentRequest {
    /// When present, moves the window start instead of toggling.
    pub since: Option<NaiveDate>,
}

/// `PUT /intents/{id}`. Without a `since` in the body this flips
/// `is_active`; with one it resets the start date.
pub async fn update_intent_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<UpdateIntentRequest>>,
) -> AppResult<Json<Intent>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();

    let intent = match request.since {
        Some(since) => {
            state
                .service
                .reset_start_date(id, midnight_utc(since))
                .await?
        }
        None => state.service.toggle_intent_activation(id).await?,
    };
    Ok(Json(intent))
}

pub async fn get_intent_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Intent>> {
    let intent = state
        .service
        .get_intent(id)
        .await?
        .ok_or_else(|| crate::errors::AppError::not_found(format!("intent {id} not found")))?;
    Ok(Json(intent))
}

#[derive(Debug, Deserialize)]
pub struct ListIntentsQuery {
    pub status: Option<IntentStatus>,
    pub is_active: Option<bool>,
    pub repository_name: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn list_intents_handler(
    State(state): State<AppState>,
    Query(query): Query<ListIntentsQuery>,
) -> AppResult<Json<Paginated<Intent>>> {
    let filter = IntentFilter {
        status: query.status,
        is_active: query.is_active,
        repository_name: query.repository_name,
    };
    let page = state
        .service
        .list_intents(filter, pagination(query.page, query.per_page))
        .await?;
    Ok(Json(page))
}

pub async fn get_repository_handler(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
) -> AppResult<Json<Repository>> {
    let full_name = format!("{owner}/{name}");
    let repo = state
        .service
        .find_repository(&full_name)
        .await?
        .ok_or_else(|| {
            crate::errors::AppError::not_found(format!("repository {full_name} not found"))
        })?;
    Ok(Json(repo))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn top_committers_handler(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Paginated<AuthorStats>>> {
    let full_name = format!("{owner}/{name}");
    let page = state
        .service
        .top_committers(&full_name, pagination(query.page, query.per_page))
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct CommitsQuery {
    pub from: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn get_commits_handler(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<CommitsQuery>,
) -> AppResult<Json<CommitPage>> {
    let full_name = format!("{owner}/{name}");
    let page = state
        .service
        .get_commits(
            &full_name,
            query.from.map(midnight_utc),
            query.until.map(midnight_utc),
            pagination(query.page, query.per_page),
        )
        .await?;
    Ok(Json(page))
}
