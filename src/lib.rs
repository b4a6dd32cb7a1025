pub mod app;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod eutils;
pub mod lineage;
pub mod output;
pub mod resolver;
pub mod retry;
pub mod taxdb;
