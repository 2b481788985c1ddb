pub mod config;
pub mod domain;
pub mod inventory;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;
