pub mod admin_service;
pub mod config_loader;
pub mod health;
pub mod import_service;
pub mod progress_store;
pub mod row_mapper;
pub mod scheduler;
pub mod statistics;
