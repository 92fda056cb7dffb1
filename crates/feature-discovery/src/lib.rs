pub mod app;
pub mod config;
pub mod daemon;
pub mod label;
pub mod output;
pub mod resource;
