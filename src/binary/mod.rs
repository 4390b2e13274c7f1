//! Binary database format: offline builder, memory-mapped reader, and
//! the range-index tables behind the lookup engine.
//!
//! # File Structure
//!
//! ```text
//! +----------------------+
//! |  HEADER (64 bytes)   |  magic "IPL4", version, build time,
//! +----------------------+  strings/section spans
//! |  STRINGS BLOB        |  count + length-prefixed entries
//! +----------------------+
//! |  PAD (to 8 bytes)    |  keeps fixed-width tables aligned
//! +----------------------+
//! |  SECTION (160 bytes) |  22 u32 fields locating every table
//! +----------------------+
//! |  LABEL TABLES        |  country, cn, provider records
//! +----------------------+
//! |  INTERVAL TABLES     |  4 x (starts[], ends[], labels[]) u32 arrays
//! +----------------------+
//! ```
//!
//! All multi-byte values are little-endian. The interval arrays are kept
//! parallel (not array-of-struct) on purpose: the hot path searches only
//! `starts` and touches `ends`/`labels` once per hit.

mod format;
mod reader;
mod table;
mod writer;


pub use format::{PairLabel, ProviderLabel, FORMAT_VERSION, HEADER_SIZE, LABEL_NONE, MAGIC, SECTION_SIZE};
pub use reader::Db;
pub use writer::build;

#[cfg(test)]
pub(crate) use reader::byte_swap_tables;
#[cfg(test)]
pub(crate) use writer::build_to_vec;
