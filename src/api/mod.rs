//! HTTP API for deployments and inventory

mod handlers;
mod server;
mod types;

pub use server::{router, Server};
pub use types::*;
