// src/proxy/mod.rs
mod handler;

pub use handler::{ConnectionHandler, ProxyError};
