//! Storage Module
//!
//! Persistent storage layer: append-only segments plus the index that
//! locates each key's current record.
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── index.idx                  KEYHASH|SEGMENT|POSITION per line
//!   ├── index.idx.tmp              snapshot being written (renamed over index.idx)
//!   ├── segment_<uuid>.seg         KEYHASH|HEXVALUE per line
//!   └── segment_<uuid>.seg.compact rewrite being written (renamed over its segment)
//! ```
//!
//! ## Segment Lifecycle
//! ```text
//!  active ──rotate──▶ sealed ──edit orphans a record──▶ sealed+dirty
//!                       ▲                                    │
//!                       └───────────── compact ──────────────┘
//! ```

mod index;
mod manager;
mod segment;

pub use index::{Index, IndexFile, ValuePointer};
pub use manager::StorageManager;
pub use segment::Segment;
