pub mod args;
pub mod chain;
pub mod config;
pub mod core;
pub mod errors;
pub mod observation;
pub mod readwrite;
pub mod runner;
pub mod stats;
