pub mod asset_registry;
pub mod configure;
pub mod engine;
pub mod logging;
pub mod models;
