//! NCM foreign-trade statistics: reconciliation of product codes and
//! export/import aggregation over the Comex Stat API.

pub mod cache;
pub mod comex;
pub mod config;
pub mod error;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod storage;
pub mod utils;
