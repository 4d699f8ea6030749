use actix_web::{post, HttpResponse, Result};
use actix_web::web::{Data, Json};
use serde::{Deserialize, Serialize};

use crate::config::PollConfig;
use crate::handlers::devices::ErrorResponse;
use crate::models::device::{string_or_number, Role};
use crate::services::odoo::RecordStore;
use crate::services::resolver::lookup_user_role;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleLookupRequest {
    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleLookupResponse {
    pub user_id: i64,
    pub role: Role,
    pub groups: Vec<String>,
}

#[post("/user_role")]
pub async fn user_role(
    store: Data<dyn RecordStore>,
    config: Data<PollConfig>,
    payload: Json<RoleLookupRequest>,
) -> Result<HttpResponse> {
    let Some(user_id) = payload.user_id.as_deref().and_then(|id| id.parse::<i64>().ok()) else {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "A numeric userId is required".to_string(),
        }));
    };

    match lookup_user_role(store.get_ref(), config.request_timeout(), user_id).await {
        Ok((role, groups)) => {
            log::info!("User {} classified as {}", user_id, role);
            Ok(HttpResponse::Ok().json(RoleLookupResponse { user_id, role, groups }))
        }
        Err(e) => {
            log::error!("Role lookup for user {} failed: {}", user_id, e);
            Ok(HttpResponse::BadGateway().json(ErrorResponse {
                error: format!("Role lookup failed: {}", e),
            }))
        }
    }
}
