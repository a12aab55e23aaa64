pub mod app;
pub mod audio;
pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod display;
pub mod engine;
pub mod host;
pub mod metadata;
pub mod model;
pub mod playlist;
pub mod ui;
