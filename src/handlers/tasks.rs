use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::TaskId;
use actix_web::{web, HttpResponse};

/// `GET /task-status/{task_id}`: current snapshot of a batch task.
///
/// Ids that don't parse are reported the same way as unknown ids.
pub async fn get_task_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let raw = path.into_inner();
    let task_id: TaskId = raw
        .parse()
        .map_err(|_| AppError::NotFound(format!("Task {} not found", raw)))?;

    let task = state.registry.get(&task_id)?;
    Ok(HttpResponse::Ok().json(task))
}
