//! Error taxonomy shared by the store, fetcher, synchronizer, orchestrator and
//! neighborhood assembler.
//!
//! Only fatal conditions live here. Non-fatal outcomes (no matching buildings,
//! unknown/ambiguous weather stations) are reported as values on the step
//! reports instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The store file could not be opened or is not a database.
    #[error("store connection failed for {path}: {message}")]
    StoreConnection { path: PathBuf, message: String },

    /// Malformed statement or schema mismatch.
    #[error("query failed: {message}\n  statement: {statement}")]
    Query { statement: String, message: String },

    #[error("schema bootstrap failed: {0}")]
    Schema(String),

    /// Remote artifact unreachable after the retry budget was spent.
    #[error("fetch of {url} failed after {attempts} attempt(s): {message}")]
    Fetch { url: String, attempts: u32, message: String },

    /// A downloaded artifact could not be decoded.
    #[error("could not decode {artifact}: {message}")]
    Decode { artifact: String, message: String },

    #[error("invalid metadata filter: {0}")]
    InvalidFilter(String),

    /// Required model or weather document missing before a simulation.
    #[error("missing {what} for {simulation_id}")]
    MissingInput { simulation_id: String, what: String },

    #[error("model translation failed for {simulation_id}: {message}")]
    Translation { simulation_id: String, message: String },

    /// The external engine reported failure.
    #[error("simulation {simulation_id} failed ({message}); see {diagnostics}")]
    SimulationExecution {
        simulation_id: String,
        message: String,
        diagnostics: PathBuf,
    },

    #[error("neighborhood incomplete: {} of {requested} building(s) missing: {}", missing.len(), missing.join(", "))]
    IncompleteNeighborhood { requested: usize, missing: Vec<String> },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn query(statement: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::Query {
            statement: statement.into(),
            message: err.to_string(),
        }
    }

    pub fn decode(artifact: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::Decode {
            artifact: artifact.into(),
            message: err.to_string(),
        }
    }
}

/// Transaction bookkeeping failures (begin/commit/rollback) carry no statement of their own.
impl From<diesel::result::Error> for Error {
    fn from(err: diesel::result::Error) -> Self {
        Error::query("<transaction>", err)
    }
}
