pub mod devices;
pub mod health;
pub mod roles;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{web, Error, HttpRequest, HttpResponse};

use devices::ErrorResponse;

/// Malformed bodies (including an unknown role) answer with the same
/// `{error}` shape as the handlers' own validation failures.
fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> Error {
    let message = err.to_string();
    log::warn!("Rejected request body: {}", message);
    InternalError::from_response(err, HttpResponse::BadRequest().json(ErrorResponse { error: message })).into()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .route("/", web::get().to(health::health_check))
        .route("/health", web::get().to(health::health_check))
        .service(devices::register_token)
        .service(devices::unregister_token)
        .service(devices::list_devices)
        .service(roles::user_role);
}
