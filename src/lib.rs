pub mod compute;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod loader;
pub mod models;
pub mod producer;
pub mod resource_manager;
pub mod sink;
pub mod work_queue;
