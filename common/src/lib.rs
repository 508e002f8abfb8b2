// Common library: multi-tenant notification registry, store and monitor

pub mod adapters;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod monitor;
pub mod notification_store;
pub mod registry;
pub mod service;
pub mod subscription;
pub mod telemetry;

pub use service::NotificationService;
