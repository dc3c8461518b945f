//! HTTP API: order commands, the live order stream, and process wiring.

pub mod app;
