//! Widget handlers - the throttled demo resource.

use actix_web::{HttpResponse, web};

use sluice_shared::ApiResponse;
use sluice_shared::dto::CreateWidgetRequest;

use crate::middleware::error::{AppError, AppResult};
use crate::state::AppState;

/// GET /api/widgets
pub async fn list(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::ok(state.widgets.list().await))
}

/// POST /api/widgets
pub async fn create(
    state: web::Data<AppState>,
    body: web::Json<CreateWidgetRequest>,
) -> AppResult<HttpResponse> {
    let name = body.into_inner().name;
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("Widget name must not be empty".to_string()));
    }

    let widget = state.widgets.create(name.trim().to_string()).await;
    tracing::info!(id = widget.id, "Widget created");

    Ok(HttpResponse::Created().json(ApiResponse::ok(widget)))
}

/// GET /api/widgets/{id}
pub async fn get(state: web::Data<AppState>, path: web::Path<u64>) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let widget = state
        .widgets
        .find(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Widget {id} does not exist")))?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(widget)))
}
