pub mod bluos;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod gesture;
pub mod model_download;
pub mod pipeline;
pub mod state;
pub mod types;
