//! Semantic analysis of pseudo-variables in Kamailio KEMI Python scripts.
//!
//! [`host::AnalysisHost`] is the entry point: feed it document and file-system
//! events, then ask it for diagnostics, definitions, references, hovers,
//! completions and semantic tokens.

pub mod analysis;
pub mod analyzers;
pub mod config;
pub mod debounce;
pub mod diagnostics;
pub mod host;
pub mod indexer;

pub use config::Config;
pub use host::{AnalysisHost, FileEvent, HostError};
