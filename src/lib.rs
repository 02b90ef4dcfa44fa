//! # AllyKV
//!
//! A log-structured key-value store with:
//! - Append-only segment files and a persisted hash index
//! - Write and edit buffers that keep puts off the disk path
//! - A bounded LRU read cache
//! - Background maintenance: flushing, index snapshots and compaction
//! - TCP-based client protocol
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │                  (Multiple Clients)                          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Engine                                 │
//! │           (one exclusive section for all state)              │
//! └──────┬──────────────────────┬──────────────────────▲────────┘
//!        │                      │                      │
//!        ▼                      ▼                      │
//!   ┌─────────────┐      ┌─────────────┐     ┌─────────┴───────┐
//!   │   Buffers   │      │    Index    │     │   Maintenance   │
//!   │ write/edit/ │      │ hash → seg, │     │ flush / persist │
//!   │    cache    │      │   offset    │     │    / compact    │
//!   └──────┬──────┘      └──────┬──────┘     └─────────────────┘
//!          │ flush              │ snapshot
//!          ▼                    ▼
//!   ┌─────────────┐      ┌─────────────┐
//!   │  Segments   │      │  index.idx  │
//!   │ (append)    │      │ (tmp+rename)│
//!   └─────────────┘      └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod storage;
pub mod buffer;
pub mod engine;
pub mod maintenance;
pub mod network;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AllyError, Result};
pub use config::{Config, MaintenanceConfig};
pub use engine::{CompactionStats, Engine, PutOutcome};
pub use maintenance::MaintenanceScheduler;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AllyKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
