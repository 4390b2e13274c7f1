//! ipl4 - an embedded, read-only IPv4 geolocation and provider database.
//!
//! Given an IPv4 address, a lookup returns up to four orthogonal labels:
//! ISO-3166 country, Chinese administrative province, Chinese
//! administrative city, and network provider (ISP or cloud vendor).
//!
//! # Features
//!
//! - **Offline build**: plaintext CIDR lists compile into a single
//!   memory-mappable file
//! - **Zero-copy open**: the loader maps the file and hands out typed
//!   views into it; there is no deserialization pass
//! - **Sub-microsecond lookups**: a 65,536-entry bucket index narrows
//!   each query to a handful of intervals before a linear or binary
//!   search on the interval starts
//! - **Allocation-free hot path**: id-only lookups never touch strings
//! - **Thread-safe reads**: after open the database is immutable; share
//!   one instance across any number of threads
//!
//! # Quick Start
//!
//! ```ignore
//! use ipl4::Db;
//!
//! // Offline: compile a data/ directory of CIDR lists.
//! ipl4::build("./data", "./ipl4.db")?;
//!
//! // Runtime: map the file and look up addresses.
//! let db = Db::open("./ipl4.db")?;
//! if let Some(hit) = db.lookup("1.0.1.128")? {
//!     println!("{} {} {}", hit.country_code, hit.provider_name, hit.provider_kind);
//! }
//!
//! // Hot loops: skip string decoding entirely.
//! let ids = db.lookup_ids_u32(0x0882_0003);
//! ```
//!
//! # Input data layout
//!
//! ```text
//! data/
//!   country/<CC>.txt    one IPv4 CIDR per line, <CC> = ISO 3166 alpha-2
//!   cncity/<CODE>.txt   <CODE> = 6-digit CN admin code
//!   isp/<KEY>.txt       <KEY> = provider key, e.g. aliyun
//! ```

mod cidr;
mod error;
mod export;
mod kind;
mod lookup;
mod names;
mod strings;

pub mod binary;

// Re-export core types
pub use binary::{build, Db, LABEL_NONE};
pub use cidr::range_to_cidrs;
pub use error::{Error, Result};
pub use kind::ProviderKind;
pub use lookup::{Lookup, LookupIds};
