use actix_web::{get, post, HttpResponse, Result};
use actix_web::web::{Data, Json};
use serde::Serialize;
use validator::Validate;

use crate::models::device::{DeviceSummary, RegisterTokenRequest, UnregisterTokenRequest};
use crate::services::registry::DeviceRegistry;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub success: bool,
    pub devices_count: usize,
}

#[derive(Serialize)]
pub struct DeviceListResponse {
    pub count: usize,
    pub devices: Vec<DeviceSummary>,
}

#[post("/register_token")]
pub async fn register_token(
    registry: Data<DeviceRegistry>,
    payload: Json<RegisterTokenRequest>,
) -> Result<HttpResponse> {
    if let Err(errors) = payload.validate() {
        log::warn!("Rejected token registration: {}", errors);
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "Token is required".to_string(),
        }));
    }

    let request = payload.into_inner();
    let count = registry
        .upsert(request.token, request.user_id, request.role)
        .await;
    log::info!("Registered devices: {}", count);

    Ok(HttpResponse::Ok().json(RegisterResponse {
        success: true,
        devices_count: count,
    }))
}

#[post("/unregister_token")]
pub async fn unregister_token(
    registry: Data<DeviceRegistry>,
    payload: Json<UnregisterTokenRequest>,
) -> Result<HttpResponse> {
    if registry.remove(&payload.token).await {
        log::info!("Token unregistered");
    } else {
        log::debug!("Unregister called for an unknown token");
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

#[get("/devices")]
pub async fn list_devices(registry: Data<DeviceRegistry>) -> Result<HttpResponse> {
    let devices = registry.summaries().await;
    Ok(HttpResponse::Ok().json(DeviceListResponse {
        count: devices.len(),
        devices,
    }))
}
