#![warn(clippy::unwrap_used)]

pub mod csv;
pub mod export;
pub mod jobs;
pub mod rest;
pub mod server;

pub use server::ApiServer;
