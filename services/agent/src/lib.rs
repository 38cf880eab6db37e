// agent: library entry point. Exposes modules for integration testing and
// for `main.rs`'s task wiring.

pub mod backend_client;
pub mod collector;
pub mod config;
pub mod diagnostics;
pub mod interfaces;
pub mod packet_source;
pub mod redactor;
pub mod telemetry;
pub mod uploader;
pub mod witness_builder;
