use actix_web::{HttpResponse, Result};
use actix_web::web::Data;
use chrono::Utc;
use serde::Serialize;

use crate::services::registry::DeviceRegistry;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub registered_devices: usize,
    pub timestamp: String,
}

pub async fn health_check(registry: Data<DeviceRegistry>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        registered_devices: registry.len().await,
        timestamp: Utc::now().to_rfc3339(),
    }))
}
