pub mod config;
pub mod contracts;
pub mod error;
pub mod models;
pub mod services;
