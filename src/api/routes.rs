use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/records", web::post().to(handlers::append_record))
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/blocks/{index}", web::get().to(handlers::get_block))
            .route("/files", web::get().to(handlers::list_files))
            .route("/files/{storage_hash}", web::get().to(handlers::get_file))
            .route("/files/{storage_hash}/history", web::get().to(handlers::get_file_history))
            .route("/validate", web::get().to(handlers::validate_chain))
    );
}
