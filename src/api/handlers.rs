use actix_web::{web, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::schema::{ErrorResponse, FileEntry};
use crate::config::Config;
use crate::ledger::validation::validate_blocks;
use crate::ledger::{Block, CancelFlag, FileRecord, Ledger, LedgerError, ValidationReport};

/// Shared ledger handle
pub type LedgerData = web::Data<Ledger>;

/// Shared service configuration
pub type ConfigData = web::Data<Config>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the record endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RecordRequest {
    /// Name of the uploaded file
    pub original_filename: String,

    /// Content-addressed storage hash returned by the storage backend
    pub storage_hash: String,

    /// Name of the uploader
    #[serde(default)]
    pub uploader_name: Option<String>,

    /// Size of the file in bytes
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl From<RecordRequest> for FileRecord {
    fn from(req: RecordRequest) -> Self {
        let record = FileRecord::new(req.original_filename, req.storage_hash, req.uploader_name);
        match req.file_size {
            Some(file_size) => record.with_file_size(file_size),
            None => record,
        }
    }
}

/// Response for the record endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RecordResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Raises the cancel flag when dropped, stopping mining for a request that
/// went away
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Maps a ledger error onto a status code
fn error_response(err: &LedgerError) -> HttpResponse {
    let body = ErrorResponse::new(err);
    match err {
        LedgerError::NotFound(_) => HttpResponse::NotFound().json(body),
        LedgerError::InvalidPayload(_) => HttpResponse::BadRequest().json(body),
        LedgerError::MiningCancelled { .. } => HttpResponse::ServiceUnavailable().json(body),
        LedgerError::ChainCorrupt(_)
        | LedgerError::InvalidDifficulty(_)
        | LedgerError::StorageError(_) => {
            error!("Ledger failure: {}", err);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Record a file upload
///
/// Mines a new block holding the file metadata
#[utoipa::path(
    post,
    path = "/api/v1/records",
    request_body = RecordRequest,
    responses(
        (status = 201, description = "Record mined into a new block", body = RecordResponse),
        (status = 400, description = "Missing file metadata", body = ErrorResponse),
        (status = 503, description = "Mining did not finish in time", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn append_record(
    ledger: LedgerData,
    config: ConfigData,
    record_req: web::Json<RecordRequest>,
) -> impl Responder {
    let record = FileRecord::from(record_req.into_inner());
    let cancel = CancelFlag::new();
    let budget = config.mining_budget().with_cancel_flag(cancel.clone());
    let _cancel_guard = CancelOnDrop(cancel);
    let ledger = ledger.into_inner();

    // Mining is CPU bound, keep it off the worker threads
    let mined = tokio::task::spawn_blocking(move || ledger.append_record(record, &budget)).await;

    match mined {
        Ok(Ok(block)) => HttpResponse::Created().json(RecordResponse {
            message: "New Block Mined".to_string(),
            block,
        }),
        Ok(Err(err)) => error_response(&err),
        Err(err) => {
            error!("Mining task failed: {}", err);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Mining task failed"))
        }
    }
}

/// Get the full ledger
///
/// Returns the entire chain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    // Validate the same snapshot that is returned
    let chain = ledger.chain();
    let is_valid = validate_blocks(&chain, ledger.difficulty()).is_valid();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    })
}

/// Get a block by index
#[utoipa::path(
    get,
    path = "/api/v1/blocks/{index}",
    params(
        ("index" = u64, Path, description = "Position of the block in the chain")
    ),
    responses(
        (status = 200, description = "Block found", body = Block),
        (status = 404, description = "No block at this index", body = ErrorResponse)
    )
)]
pub async fn get_block(ledger: LedgerData, index: web::Path<u64>) -> impl Responder {
    match ledger.get_block(index.into_inner()) {
        Ok(block) => HttpResponse::Ok().json(block),
        Err(err) => error_response(&err),
    }
}

/// List recorded files
///
/// Returns every recorded file, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/files",
    responses(
        (status = 200, description = "Files retrieved successfully", body = Vec<FileEntry>)
    )
)]
pub async fn list_files(ledger: LedgerData) -> impl Responder {
    let files: Vec<FileEntry> = ledger.records().iter().filter_map(FileEntry::from_block).collect();
    HttpResponse::Ok().json(files)
}

/// Look up a file by storage hash
///
/// Returns the most recent record of the hash
#[utoipa::path(
    get,
    path = "/api/v1/files/{storage_hash}",
    params(
        ("storage_hash" = String, Path, description = "Content-addressed storage hash")
    ),
    responses(
        (status = 200, description = "File found", body = FileEntry),
        (status = 404, description = "No record of this hash", body = ErrorResponse)
    )
)]
pub async fn get_file(ledger: LedgerData, storage_hash: web::Path<String>) -> impl Responder {
    let entry = ledger.find_by_storage_hash(&storage_hash).and_then(|block| {
        FileEntry::from_block(&block)
            .ok_or_else(|| LedgerError::NotFound(format!("Block {} holds no file", block.index)))
    });

    match entry {
        Ok(entry) => HttpResponse::Ok().json(entry),
        Err(err) => error_response(&err),
    }
}

/// List every record of a storage hash
///
/// Returns all uploads of the same content, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/files/{storage_hash}/history",
    params(
        ("storage_hash" = String, Path, description = "Content-addressed storage hash")
    ),
    responses(
        (status = 200, description = "Records found", body = Vec<FileEntry>),
        (status = 404, description = "No record of this hash", body = ErrorResponse)
    )
)]
pub async fn get_file_history(ledger: LedgerData, storage_hash: web::Path<String>) -> impl Responder {
    match ledger.find_all_by_storage_hash(&storage_hash) {
        Ok(blocks) => {
            let entries: Vec<FileEntry> = blocks.iter().filter_map(FileEntry::from_block).collect();
            HttpResponse::Ok().json(entries)
        }
        Err(err) => error_response(&err),
    }
}

/// Validate the ledger
///
/// Checks every block and reports the first broken rule
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Validation report", body = ValidationReport)
    )
)]
pub async fn validate_chain(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(ledger.validate())
}
