pub mod about;
pub mod branch_tree;
pub mod cleanup;
pub mod config;
pub mod control_file;
pub mod error;
pub mod executable;
pub mod lrt;
pub mod models;
pub mod orchestrator;
pub mod output_parser;
pub mod reports;
pub mod run_log;
pub mod runner;
pub mod signals;
pub mod sites;
pub mod summary;

pub use error::BatchError;
pub use models::builtin_catalog;
