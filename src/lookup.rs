//! Lookup result records.

use std::net::Ipv4Addr;

use crate::binary::LABEL_NONE;
use crate::ProviderKind;

/// Fully decoded lookup result for a single IPv4 address.
///
/// Fields are empty when the category has no match. City and province are
/// mutually exclusive: a city-level hit leaves the province fields empty.
/// All strings borrow from the database mapping and live as long as the
/// [`Db`](crate::Db) they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup<'db> {
    pub ip: Ipv4Addr,

    pub country_code: &'db str,
    pub country_name: &'db str,

    pub cn_province_code: &'db str,
    pub cn_province_name: &'db str,

    pub cn_city_code: &'db str,
    pub cn_city_name: &'db str,

    /// e.g. `aliyun`, `chinatelecom`
    pub provider_key: &'db str,
    pub provider_name: &'db str,
    pub provider_kind: ProviderKind,
}

impl Lookup<'_> {
    pub(crate) fn empty(ip: Ipv4Addr) -> Self {
        Lookup {
            ip,
            country_code: "",
            country_name: "",
            cn_province_code: "",
            cn_province_name: "",
            cn_city_code: "",
            cn_city_name: "",
            provider_key: "",
            provider_name: "",
            provider_kind: ProviderKind::Unknown,
        }
    }
}

/// Label-id lookup result; skips all string decoding on the hot path.
///
/// Ids index the underlying label tables. A category with no match holds
/// [`LABEL_NONE`]. Decode ids later with
/// [`country_by_id`](crate::Db::country_by_id) and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupIds {
    pub ip: Ipv4Addr,

    pub country_id: u32,
    pub cn_province_id: u32,
    pub cn_city_id: u32,

    pub provider_id: u32,
    pub provider_kind: ProviderKind,
}

impl LookupIds {
    pub(crate) fn empty(ip: Ipv4Addr) -> Self {
        LookupIds {
            ip,
            country_id: LABEL_NONE,
            cn_province_id: LABEL_NONE,
            cn_city_id: LABEL_NONE,
            provider_id: LABEL_NONE,
            provider_kind: ProviderKind::Unknown,
        }
    }
}
