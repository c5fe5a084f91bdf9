pub mod avatar;
pub mod cache;
pub mod config;
pub mod db;
pub mod gateway;
pub mod ingest;
pub mod model;
pub mod platform;
