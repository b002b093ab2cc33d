//! Request-scoped log writer backed by a capped store
//!
//! Messages logged during one unit of work (typically one web request) are
//! folded into a single combined record and written to a capped collection
//! when the unit ends. When the store is unavailable at construction the
//! writer degrades to a plain log file.
//!
//! ```ignore
//! let logger = capped_logger::init::create_logger(options).await;
//!
//! logger
//!     .run(metadata, async {
//!         logger.info("Processing order").await;
//!         handle_order().await
//!     })
//!     .await?;
//! ```

pub mod capped;
pub mod config;
pub mod error;
pub mod init;
pub mod layer;
pub mod record;
pub mod severity;
pub mod sink;
pub mod store;
pub mod unit;
pub mod writer;

pub use error::{LogError, Result};
pub use record::{CombinedRecord, LogRecord, Metadata};
pub use severity::Severity;
pub use unit::Unit;
pub use writer::{ConnectError, LogWriter, Logger, LoggerOptions, WriterState};
