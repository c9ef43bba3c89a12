//! File storage
//!
//! - [`ContentStore`] - hash-addressed files per owner scope
//! - [`StorageLayout`] - directory structure under the storage root
//! - [`fs`] - recursive size, listing and removal primitives

mod content;
pub mod fs;
mod layout;

pub use content::{parse_stored_name, ContentStore, StoreOutcome};
pub use layout::StorageLayout;
