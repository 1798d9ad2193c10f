//! Storage and service layer for MathSearch.
//!
//! - `log`: append-only formula and crawl-data stores
//! - `data_dir`: on-disk layout, index image load/save
//! - `config`: [`ServiceConfig`]
//! - `harvest`: loading parsed harvests into an index
//! - `service`: [`SearchService`], the surface a daemon needs

pub mod config;
pub mod data_dir;
pub mod harvest;
pub mod log;
pub mod service;

pub use config::ServiceConfig;
pub use data_dir::DataDir;
pub use harvest::{load_harvest, HarvestStats};
pub use log::{LogCrawlStore, LogFormulaStore, RecordLog};
pub use service::{SearchService, ServiceStats};
