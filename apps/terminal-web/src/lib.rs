pub mod admission;
pub mod audit;
pub mod config;
pub mod document;
pub mod navigation;
pub mod program;
pub mod server;
pub mod telemetry;
pub mod terminal;
