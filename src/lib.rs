pub mod config;
pub mod dataset;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod executor;
pub mod fs_util;
pub mod layout;
pub mod lineage;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod schema;
pub mod settings;
pub mod sources;
pub mod summary;
pub mod tools;
