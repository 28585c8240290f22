//! IPC: MRPC server, service implementation, and typed client connection.

mod client;
mod server;
mod service;

pub use client::Connection;
pub(crate) use server::IpcServer;
