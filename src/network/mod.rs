//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single acceptor thread (non-blocking accept, polls the shutdown flag)
//! - Fixed worker pool fed through a bounded channel
//! - Commands routed through Engine
//!
//! The adapter carries no storage logic: each request becomes one
//! `Engine::execute` call.

mod connection;
mod server;

pub use connection::Connection;
pub use server::Server;
