/*
 * AqyntSwap client core
 * Core library exports and module declarations
 */

pub mod api;
pub mod balances;
pub mod config;
pub mod dex;
pub mod form;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod pools;
pub mod queries;
pub mod quote;
pub mod rpc;
pub mod service;
pub mod testing;
pub mod tokens;
pub mod utils;

pub use config::Config;
pub use models::*;
pub use service::DexService;
