use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// 受保护路由的响应
pub async fn private() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "Response from private endpoint",
        }),
    )
}

/// 公开路由的响应
pub async fn public() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "Response from public endpoint",
        }),
    )
}
