use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    ActionResponse, AppState, AskRequest, AskResponse, CredentialRequest, FormatRequest,
    MergeKeysRequest, SessionView,
};
use crate::session::Slot;
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session).delete(end_session))
        .route("/api/sessions/{id}/credential", post(save_credential))
        .route("/api/sessions/{id}/format", put(set_format))
        .route("/api/sessions/{id}/merge-keys", put(set_merge_keys))
        .route(
            "/api/sessions/{id}/datasets/{slot}",
            post(upload_dataset).delete(remove_dataset),
        )
        .route("/api/sessions/{id}/ask", post(ask))
        .with_state(state)
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionView>) {
    let session = state.new_session();
    let view = session.view();
    let id = state.sessions.insert(session).await;
    info!(session_id = %id, "Session created");
    (StatusCode::CREATED, Json(view))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SessionView>> {
    let shared = state.sessions.get(id).await?;
    let session = shared.lock().await;
    Ok(Json(session.view()))
}

async fn end_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state.sessions.remove(id).await?;
    info!(session_id = %id, "Session ended");
    Ok(StatusCode::NO_CONTENT)
}

async fn save_credential(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CredentialRequest>,
) -> AppResult<Json<ActionResponse>> {
    let shared = state.sessions.get(id).await?;
    let mut session = shared.lock().await;
    session.save_credential(&request.api_key).await?;
    Ok(Json(ActionResponse {
        message: "API Key Saved Successfully".to_string(),
        session: session.view(),
    }))
}

async fn set_format(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<FormatRequest>,
) -> AppResult<Json<SessionView>> {
    let shared = state.sessions.get(id).await?;
    let mut session = shared.lock().await;
    session.set_format(request.format);
    Ok(Json(session.view()))
}

async fn set_merge_keys(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<MergeKeysRequest>,
) -> AppResult<Json<SessionView>> {
    let shared = state.sessions.get(id).await?;
    let mut session = shared.lock().await;
    session.set_merge_keys(request.keys)?;
    Ok(Json(session.view()))
}

async fn upload_dataset(
    State(state): State<AppState>,
    Path((id, slot)): Path<(Uuid, Slot)>,
    multipart: Multipart,
) -> AppResult<Json<ActionResponse>> {
    let shared = state.sessions.get(id).await?;
    let (filename, bytes) = read_upload(multipart).await?;

    let mut session = shared.lock().await;
    if let Err(e) = session.upload(slot, &filename, &bytes) {
        warn!(session_id = %id, slot = %slot, filename = %filename, "Upload rejected: {}", e);
        return Err(e);
    }
    Ok(Json(ActionResponse {
        message: format!("Loaded {}", filename),
        session: session.view(),
    }))
}

async fn remove_dataset(
    State(state): State<AppState>,
    Path((id, slot)): Path<(Uuid, Slot)>,
) -> AppResult<Json<SessionView>> {
    let shared = state.sessions.get(id).await?;
    let mut session = shared.lock().await;
    session.remove(slot)?;
    Ok(Json(session.view()))
}

async fn ask(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AskRequest>,
) -> AppResult<Json<AskResponse>> {
    let shared = state.sessions.get(id).await?;
    let mut session = shared.lock().await;
    let answer = session.ask(&request.question).await?;
    Ok(Json(AskResponse {
        message: format!("Query processed in {:.2} seconds.", answer.elapsed_secs),
        answer,
        session: session.view(),
    }))
}

/// First multipart part that carries a filename
async fn read_upload(mut multipart: Multipart) -> AppResult<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(format!("malformed upload: {}", e)))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidRequest(format!("malformed upload: {}", e)))?;
        return Ok((filename, bytes.to_vec()));
    }
    Err(AppError::InvalidRequest("no file in upload".to_string()))
}
