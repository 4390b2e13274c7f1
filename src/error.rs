//! Error types for ipl4.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use thiserror::Error;

/// Error type for ipl4 operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database file failed structural validation at open
    #[error("invalid database: {0}")]
    InvalidDb(&'static str),

    /// Lookup received a non-IPv4 address
    #[error("unsupported ip (ipv4 only)")]
    UnsupportedIp,

    /// Input string did not parse as an IP address
    #[error("invalid ip address: {0}")]
    InvalidIp(String),

    /// Provider key not in the provider table, or kind filter mismatched
    #[error("unknown provider: {0}")]
    UnknownVendor(String),

    /// Country label id out of range
    #[error("unknown country id: {0}")]
    UnknownCountry(u32),

    /// CN city label id out of range
    #[error("unknown cn city id: {0}")]
    UnknownCity(u32),

    /// A source line did not parse as a CIDR
    #[error("{}: invalid CIDR {line:?}", path.display())]
    InvalidCidr { path: PathBuf, line: String },

    /// Two ranges with different labels overlap within one category
    #[error(
        "{category}: range {prev_start}-{prev_end} (label {prev_label}) \
         overlaps {cur_start}-{cur_end} (label {cur_label})"
    )]
    RangeOverlap {
        category: &'static str,
        prev_start: Ipv4Addr,
        prev_end: Ipv4Addr,
        prev_label: String,
        cur_start: Ipv4Addr,
        cur_end: Ipv4Addr,
        cur_label: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ipl4 operations.
pub type Result<T> = std::result::Result<T, Error>;
