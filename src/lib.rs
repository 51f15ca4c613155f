mod backup;
mod config;
mod error;
mod utils;

pub mod args;
pub mod commands;
pub mod engine;
pub mod model;
pub mod pipeline;
pub mod rates;
pub mod report;
pub mod text;
pub mod workbook;


pub use backup::Backup;
pub use config::Config;
pub use error::{Error, Result, WorkbookLocked};
