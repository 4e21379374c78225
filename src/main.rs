use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod config;
mod ledger;

use config::Config;
use ledger::{Ledger, LedgerError};

// Open the ledger from storage, falling back to memory if the database is unusable
fn initialize_ledger(config: &Config) -> anyhow::Result<Ledger> {
    // Create data directory if it doesn't exist
    std::fs::create_dir_all(&config.data_dir).unwrap_or_else(|e| {
        warn!("Failed to create data directory: {}", e);
    });

    match Ledger::with_storage(&config.data_dir, config.difficulty, &config.mining_budget()) {
        Ok(ledger) => {
            info!(
                "Loaded ledger from storage at {} ({} blocks, difficulty {}, valid {})",
                config.data_dir.display(),
                ledger.len(),
                ledger.difficulty(),
                ledger.is_valid()
            );
            Ok(ledger)
        }
        // A tampered or unreadable chain must not be papered over with a fresh one
        Err(err @ LedgerError::ChainCorrupt(_)) => {
            Err(err).context("stored ledger failed validation")
        }
        Err(err) => {
            warn!("Failed to load ledger from storage: {}", err);
            warn!("Creating in-memory ledger instead");

            Ledger::new(config.difficulty, &config.mining_budget())
                .context("failed to mine genesis block")
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::append_record,
        api::handlers::get_chain,
        api::handlers::get_block,
        api::handlers::list_files,
        api::handlers::get_file,
        api::handlers::get_file_history,
        api::handlers::validate_chain
    ),
    components(
        schemas(
            ledger::Block,
            ledger::Payload,
            ledger::FileRecord,
            ledger::ValidationReport,
            ledger::Violation,
            ledger::Invariant,
            ledger::validation::BlockReport,
            api::schema::ErrorResponse,
            api::schema::FileEntry,
            api::handlers::ChainResponse,
            api::handlers::RecordRequest,
            api::handlers::RecordResponse
        )
    ),
    tags(
        (name = "ledger", description = "File upload ledger API endpoints")
    ),
    info(
        title = "Upload Ledger API",
        version = "1.0.0",
        description = "A proof-of-work ledger of file upload metadata",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        "Difficulty {}, mining timeout {:?}",
        config.difficulty, config.mining_timeout
    );

    let ledger = web::Data::new(initialize_ledger(&config)?);
    let bind_addr = config.bind_addr.clone();
    let config = web::Data::new(config);

    info!("Starting HTTP server at http://{}", bind_addr);

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(ledger.clone())
            .app_data(config.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind(bind_addr.as_str())?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{FileRecord, MiningBudget};
    use tempfile::tempdir;

    fn test_config(data_dir: &std::path::Path) -> Config {
        Config {
            difficulty: 1,
            data_dir: data_dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_startup_reopens_stored_ledger() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir.path().join("ledger"));

        {
            let ledger = initialize_ledger(&config).unwrap();
            ledger
                .append_record(FileRecord::new("a.txt", "Qm123", None), &MiningBudget::unbounded())
                .unwrap();
        }

        let ledger = initialize_ledger(&config).unwrap();
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_startup_refuses_unreadable_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger");
        let config = test_config(&path);

        {
            let ledger = initialize_ledger(&config).unwrap();
            ledger
                .append_record(FileRecord::new("a.txt", "Qm123", None), &MiningBudget::unbounded())
                .unwrap();
        }

        {
            let db = sled::open(&path).unwrap();
            let blocks = db.open_tree("blocks").unwrap();
            blocks.insert(1u64.to_be_bytes(), &b"garbage"[..]).unwrap();
            db.flush().unwrap();
        }

        let err = initialize_ledger(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::ChainCorrupt(_))
        ));
    }
}
