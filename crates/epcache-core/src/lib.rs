pub mod config;
pub mod logging;

// Engine
pub mod control;
pub mod detail;
pub mod downloader;
pub mod error;
pub mod manifest;
pub mod merge;
pub mod paths;
pub mod protocol;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod worker;
