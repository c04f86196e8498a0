//! # metrix-io: input readers and result writers
//!
//! - [`config`]: the typed key-value network/options file
//! - [`variants`]: the line-based variant stream
//! - [`parades`]: the topological remedial-action file
//! - [`results`]: tagged tabular result blocks (R1..R10, C1..C5)
//!
//! All streams are `;`-separated. Readers resolve element names to the
//! arena handles of `metrix-core`; writers consume the plain records of
//! `metrix-algo::report` so the engine never formats anything itself.

pub mod config;
pub mod parades;
pub mod results;
pub mod variants;

pub use config::{load_case, Case, ModelIndex};
pub use parades::{read_parades, read_parades_file};
pub use results::write_variant_report;
pub use variants::{read_variants, read_variants_file};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{file}:{line}: {message}")]
    Syntax {
        file: String,
        line: usize,
        message: String,
    },

    #[error("Missing required key {0}")]
    MissingKey(String),

    #[error("Key {key}: expected {expected} values, found {found}")]
    Arity {
        key: String,
        expected: usize,
        found: usize,
    },

    #[error("Key {key}: {message}")]
    BadValue { key: String, message: String },

    #[error("Unknown element {kind} '{name}'")]
    UnknownElement { kind: &'static str, name: String },

    #[error("Network error: {0}")]
    Network(#[from] metrix_core::NetworkError),
}
