//! # slotdb - a fixed-width row store served over a line protocol
//!
//! - **Row storage**: one file per table, fixed-size slots, deleted slots
//!   chained on a free list and reused before the file grows
//! - **B-tree index**: read-only disk-resident index built from a table column
//! - **Cursors**: buffered full scans with filter pushdown, materializing sort
//! - **Server**: one non-blocking state machine per TCP connection, streaming
//!   result rows under output backpressure
//!
//! ## Usage Example
//!
//! ```bash
//! cargo run -- --data ./dbdata --listen 127.0.0.1:7788
//!
//! printf "INSERT INTO test VALUES (1, 'one')\nSELECT * FROM test\nQUIT\n" | nc 127.0.0.1 7788
//! ```

/// Command-line configuration
pub mod config;

/// Storage engine, index, cursors and statement execution
pub mod engine;

/// Error types shared by the engine and the server
pub mod error;

/// TCP accept loop and connection handling
pub mod server;

/// Request-line parsing
pub mod sql;

pub use error::{Error, Result};
