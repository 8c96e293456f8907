//! # Skiff Platform
//!
//! Core platform types for the Skiff secure transport:
//! - Unified error types (`SkiffError`, `SkiffResult`)
//! - Transport lifecycle event observer (`TransportEvent`, `TransportObserver`)
//!
//! # Examples
//!
//! ```
//! use skiff_platform::{SkiffError, SkiffResult};
//!
//! fn example_function() -> SkiffResult<String> {
//!     Ok("Hello, Skiff!".to_string())
//! }
//!
//! # fn main() -> SkiffResult<()> {
//! let result = example_function()?;
//! assert_eq!(result, "Hello, Skiff!");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;
pub mod events;

pub use error::{SkiffError, SkiffResult};
pub use events::{NullObserver, TransportEvent, TransportObserver};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
