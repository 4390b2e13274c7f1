//! Memory-mapped database reader and lookup engine.
//!
//! `open` maps the file, validates the header and every table span, then
//! computes the per-table lookup index (dense flag + bucket windows) and
//! the provider reverse map. Everything after open is a pure read of
//! mapped pages: lookups are synchronous, allocation-free, and safe to
//! call from many threads at once.

use std::fs::File;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use ahash::AHashMap;
use ipnet::Ipv4Net;
use memmap2::{Mmap, MmapMut, MmapOptions};
use once_cell::sync::Lazy;

use super::format::*;
use super::table::{view, RangeTable, Span};
use crate::cidr::range_to_cidrs;
use crate::lookup::{Lookup, LookupIds};
use crate::strings::StringTable;
use crate::{Error, ProviderKind, Result};

/// Host endianness, recorded once at first use. The file format is
/// little-endian; big-endian hosts byte-swap fixed-width tables on open.
static HOST_LITTLE_ENDIAN: Lazy<bool> = Lazy::new(|| cfg!(target_endian = "little"));

/// The mapping behind an open database.
///
/// Little-endian hosts map shared read-only. Big-endian hosts map private
/// copy-on-write so the one-time in-place byte swap never reaches the
/// file; after the swap the mapping is never written again.
enum Mapping {
    Shared(Mmap),
    Private(MmapMut),
}

impl Mapping {
    #[inline]
    fn as_bytes(&self) -> &[u8] {
        match self {
            Mapping::Shared(m) => m,
            Mapping::Private(m) => m,
        }
    }
}

/// Interval table fields of one section-header quad.
#[derive(Debug, Clone, Copy)]
struct TableFields {
    starts: usize,
    ends: usize,
    labels: usize,
    count: usize,
}

/// All 22 section-header fields.
#[derive(Debug, Clone, Copy)]
struct SectionFields {
    country_labels: (usize, usize),
    cn_labels: (usize, usize),
    provider_labels: (usize, usize),
    country: TableFields,
    cn_province: TableFields,
    cn_city: TableFields,
    provider: TableFields,
}

/// An opened IP list database.
///
/// IPv4 only. The database exclusively owns its mapping and file handle;
/// dropping it unmaps and closes. Lookup results borrow from the mapping
/// and cannot outlive the database.
pub struct Db {
    map: Mapping,
    // Held open for the lifetime of the mapping.
    _file: File,

    strings: StringTable,
    country_labels: Span,
    cn_labels: Span,
    provider_labels: Span,

    country: RangeTable,
    cn_province: RangeTable,
    cn_city: RangeTable,
    provider: RangeTable,

    provider_by_key: AHashMap<String, u32>,
}

impl Db {
    /// Open an existing database file built by [`build`](super::build).
    pub fn open(path: impl AsRef<Path>) -> Result<Db> {
        let file = File::open(path)?;
        Self::map_file(file, !*HOST_LITTLE_ENDIAN)
    }

    /// Open a database from in-memory bytes.
    ///
    /// Spills to an unlinked temp file and maps it, so the open path and
    /// lifetime rules are identical to [`open`](Db::open).
    pub fn from_bytes(data: Vec<u8>) -> Result<Db> {
        Self::from_bytes_with_swap(data, !*HOST_LITTLE_ENDIAN)
    }

    pub(crate) fn from_bytes_with_swap(data: Vec<u8>, swap: bool) -> Result<Db> {
        let mut tmp = tempfile::tempfile()?;
        tmp.write_all(&data)?;
        Self::map_file(tmp, swap)
    }

    fn map_file(file: File, swap: bool) -> Result<Db> {
        let len = file.metadata()?.len() as usize;
        if len < HEADER_SIZE {
            return Err(Error::InvalidDb("file shorter than header"));
        }
        let map = if swap {
            Mapping::Private(unsafe { MmapOptions::new().map_copy(&file)? })
        } else {
            Mapping::Shared(unsafe { Mmap::map(&file)? })
        };
        Self::parse(file, map, swap)
    }

    fn parse(file: File, mut map: Mapping, swap: bool) -> Result<Db> {
        let (strings, sec) = {
            let data = map.as_bytes();
            let (strings_off, strings_size) = read_header(data)?;
            let strings = StringTable::parse(data, strings_off, strings_size)?;
            (strings, read_section(data)?)
        };

        // On big-endian hosts, convert every fixed-width table in place
        // before any typed view exists. This is the only write to the
        // mapping, and it happens before the first lookup.
        if swap {
            if let Mapping::Private(m) = &mut map {
                swap_fixed_tables(m, &sec)?;
            }
        }

        let data = map.as_bytes();
        let country_labels =
            Span::check::<PairLabel>(data, sec.country_labels.0, sec.country_labels.1)?;
        let cn_labels = Span::check::<PairLabel>(data, sec.cn_labels.0, sec.cn_labels.1)?;
        let provider_labels =
            Span::check::<ProviderLabel>(data, sec.provider_labels.0, sec.provider_labels.1)?;

        let country = check_table(data, &sec.country)?;
        let cn_province = check_table(data, &sec.cn_province)?;
        let cn_city = check_table(data, &sec.cn_city)?;
        let provider = check_table(data, &sec.provider)?;

        let mut provider_by_key = AHashMap::with_capacity(provider_labels.count);
        {
            let records: &[ProviderLabel] = unsafe { view(data, provider_labels) };
            for (i, rec) in records.iter().enumerate() {
                let key = strings.get(data, rec.key);
                if key.is_empty() {
                    return Err(Error::InvalidDb("provider label with empty key"));
                }
                provider_by_key.insert(key.to_owned(), i as u32);
            }
        }

        log::debug!(
            "opened db: {} strings, {}/{}/{}/{} intervals, {} dense tables",
            strings.len(),
            country.len(),
            cn_province.len(),
            cn_city.len(),
            provider.len(),
            [&country, &cn_province, &cn_city, &provider]
                .iter()
                .filter(|t| t.is_dense())
                .count(),
        );

        Ok(Db {
            map,
            _file: file,
            strings,
            country_labels,
            cn_labels,
            provider_labels,
            country,
            cn_province,
            cn_city,
            provider,
            provider_by_key,
        })
    }

    #[inline]
    fn data(&self) -> &[u8] {
        self.map.as_bytes()
    }

    // --- lookups (hot path) ---

    /// Look up an IP given as text. Full decoded result.
    ///
    /// `Ok(None)` means the address matched no category.
    pub fn lookup(&self, ip: &str) -> Result<Option<Lookup<'_>>> {
        let addr: IpAddr = ip.parse().map_err(|_| Error::InvalidIp(ip.to_owned()))?;
        self.lookup_addr(addr)
    }

    /// Look up a parsed address. IPv6 input yields [`Error::UnsupportedIp`].
    pub fn lookup_addr(&self, addr: IpAddr) -> Result<Option<Lookup<'_>>> {
        match addr {
            IpAddr::V4(v4) => Ok(self.lookup_v4(v4)),
            IpAddr::V6(_) => Err(Error::UnsupportedIp),
        }
    }

    /// Look up an IPv4 address.
    pub fn lookup_v4(&self, addr: Ipv4Addr) -> Option<Lookup<'_>> {
        self.lookup_u32(u32::from(addr))
    }

    /// Look up an IPv4 address packed as `a<<24 | b<<16 | c<<8 | d`.
    pub fn lookup_u32(&self, ip: u32) -> Option<Lookup<'_>> {
        let data = self.data();
        let mut out = Lookup::empty(Ipv4Addr::from(ip));
        let mut matched = false;

        if let Some(label) = self.country.lookup(data, ip) {
            let (code, name) = self.pair_label(self.country_labels, label);
            out.country_code = code;
            out.country_name = name;
            matched = true;
        }

        // CN admin data: a city-level hit shadows the province table.
        if let Some(label) = self.cn_city.lookup(data, ip) {
            let (code, name) = self.pair_label(self.cn_labels, label);
            out.cn_city_code = code;
            out.cn_city_name = name;
            matched = true;
        } else if let Some(label) = self.cn_province.lookup(data, ip) {
            let (code, name) = self.pair_label(self.cn_labels, label);
            out.cn_province_code = code;
            out.cn_province_name = name;
            matched = true;
        }

        if let Some(label) = self.provider.lookup(data, ip) {
            let (key, name, kind) = self.provider_label(label);
            out.provider_key = key;
            out.provider_name = name;
            out.provider_kind = kind;
            matched = true;
        }

        matched.then_some(out)
    }

    /// Like [`lookup`](Db::lookup), but yields label ids only.
    pub fn lookup_ids(&self, ip: &str) -> Result<Option<LookupIds>> {
        let addr: IpAddr = ip.parse().map_err(|_| Error::InvalidIp(ip.to_owned()))?;
        self.lookup_ids_addr(addr)
    }

    /// Like [`lookup_addr`](Db::lookup_addr), but yields label ids only.
    pub fn lookup_ids_addr(&self, addr: IpAddr) -> Result<Option<LookupIds>> {
        match addr {
            IpAddr::V4(v4) => Ok(self.lookup_ids_u32(u32::from(v4))),
            IpAddr::V6(_) => Err(Error::UnsupportedIp),
        }
    }

    /// Id-only lookup on a packed IPv4 address. No string work at all.
    pub fn lookup_ids_u32(&self, ip: u32) -> Option<LookupIds> {
        let data = self.data();
        let mut out = LookupIds::empty(Ipv4Addr::from(ip));
        let mut matched = false;

        if let Some(label) = self.country.lookup(data, ip) {
            out.country_id = label;
            matched = true;
        }

        if let Some(label) = self.cn_city.lookup(data, ip) {
            out.cn_city_id = label;
            matched = true;
        } else if let Some(label) = self.cn_province.lookup(data, ip) {
            out.cn_province_id = label;
            matched = true;
        }

        if let Some(label) = self.provider.lookup(data, ip) {
            out.provider_id = label;
            out.provider_kind = self.provider_kind(label);
            matched = true;
        }

        matched.then_some(out)
    }

    /// Provider-only fast path: skips country and CN tables entirely.
    pub fn provider_id(&self, addr: IpAddr) -> Result<Option<(u32, ProviderKind)>> {
        match addr {
            IpAddr::V4(v4) => Ok(self.provider_id_u32(u32::from(v4))),
            IpAddr::V6(_) => Err(Error::UnsupportedIp),
        }
    }

    /// Provider-only fast path on a packed IPv4 address.
    pub fn provider_id_u32(&self, ip: u32) -> Option<(u32, ProviderKind)> {
        let label = self.provider.lookup(self.data(), ip)?;
        Some((label, self.provider_kind(label)))
    }

    // --- decode (cold path) ---

    /// Decode a country label id to `(code, name)`.
    pub fn country_by_id(&self, id: u32) -> Option<(&str, &str)> {
        if id == LABEL_NONE {
            return None;
        }
        let (code, name) = self.pair_label(self.country_labels, id);
        (!code.is_empty()).then_some((code, name))
    }

    /// Decode a CN admin label id to `(code, name)`.
    pub fn cn_by_id(&self, id: u32) -> Option<(&str, &str)> {
        if id == LABEL_NONE {
            return None;
        }
        let (code, name) = self.pair_label(self.cn_labels, id);
        (!code.is_empty()).then_some((code, name))
    }

    /// Decode a provider label id to `(key, name, kind)`.
    pub fn provider_by_id(&self, id: u32) -> Option<(&str, &str, ProviderKind)> {
        if id == LABEL_NONE {
            return None;
        }
        let (key, name, kind) = self.provider_label(id);
        (!key.is_empty()).then_some((key, name, kind))
    }

    pub(crate) fn country_label_count(&self) -> u32 {
        self.country_labels.count as u32
    }

    pub(crate) fn cn_label_count(&self) -> u32 {
        self.cn_labels.count as u32
    }

    pub(crate) fn provider_label_count(&self) -> u32 {
        self.provider_labels.count as u32
    }

    // --- provider enumeration ---

    /// All CIDRs of one provider, plus its kind.
    ///
    /// Blocks come back in ascending order and cover exactly the union of
    /// the provider's ranges.
    pub fn provider_cidrs(&self, key: &str) -> Result<(Vec<Ipv4Net>, ProviderKind)> {
        self.provider_cidrs_filtered(key, None)
    }

    /// All CIDRs of one cloud vendor (e.g. `aliyun`).
    ///
    /// Keys that resolve to a non-cloud provider yield
    /// [`Error::UnknownVendor`].
    pub fn cloud_cidrs(&self, vendor: &str) -> Result<Vec<Ipv4Net>> {
        let (cidrs, _) = self.provider_cidrs_filtered(vendor, Some(ProviderKind::Cloud))?;
        Ok(cidrs)
    }

    fn provider_cidrs_filtered(
        &self,
        key: &str,
        want: Option<ProviderKind>,
    ) -> Result<(Vec<Ipv4Net>, ProviderKind)> {
        let &id = self
            .provider_by_key
            .get(key)
            .ok_or_else(|| Error::UnknownVendor(key.to_owned()))?;
        let kind = self.provider_kind(id);
        if want.is_some_and(|w| w != kind) {
            return Err(Error::UnknownVendor(key.to_owned()));
        }

        let data = self.data();
        let starts = self.provider.starts(data);
        let ends = self.provider.ends(data);
        let labels = self.provider.labels(data);

        // The table is sorted by start, so the output is already ascending.
        let mut out = Vec::new();
        for i in 0..labels.len() {
            if labels[i] == id {
                out.extend(range_to_cidrs(starts[i], ends[i]));
            }
        }
        Ok((out, kind))
    }

    // --- label decoding helpers ---

    fn pair_label(&self, span: Span, id: u32) -> (&str, &str) {
        let data = self.data();
        let records: &[PairLabel] = unsafe { view(data, span) };
        match records.get(id as usize) {
            Some(l) => (self.strings.get(data, l.code), self.strings.get(data, l.name)),
            None => ("", ""),
        }
    }

    fn provider_label(&self, id: u32) -> (&str, &str, ProviderKind) {
        let data = self.data();
        let records: &[ProviderLabel] = unsafe { view(data, self.provider_labels) };
        match records.get(id as usize) {
            Some(l) => (
                self.strings.get(data, l.key),
                self.strings.get(data, l.name),
                ProviderKind::from_u32(l.kind),
            ),
            None => ("", "", ProviderKind::Unknown),
        }
    }

    fn provider_kind(&self, id: u32) -> ProviderKind {
        let records: &[ProviderLabel] = unsafe { view(self.data(), self.provider_labels) };
        records
            .get(id as usize)
            .map(|l| ProviderKind::from_u32(l.kind))
            .unwrap_or_default()
    }
}

fn read_u32(data: &[u8], off: usize) -> usize {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]) as usize
}

/// Validate the fixed header; returns the strings blob span.
fn read_header(data: &[u8]) -> Result<(usize, usize)> {
    if data.len() < HEADER_SIZE {
        return Err(Error::InvalidDb("file shorter than header"));
    }
    if data[0..4] != MAGIC {
        return Err(Error::InvalidDb("bad magic"));
    }
    let version = u16::from_le_bytes([data[HDR_VERSION], data[HDR_VERSION + 1]]);
    if version != FORMAT_VERSION {
        return Err(Error::InvalidDb("unsupported version"));
    }
    let strings_off = read_u32(data, HDR_STRINGS_OFF);
    let strings_size = read_u32(data, HDR_STRINGS_SIZE);
    if strings_off == 0
        || strings_size == 0
        || strings_off
            .checked_add(strings_size)
            .map_or(true, |end| end > data.len())
    {
        return Err(Error::InvalidDb("strings span out of bounds"));
    }
    Ok((strings_off, strings_size))
}

/// Read the 22-field section header.
fn read_section(data: &[u8]) -> Result<SectionFields> {
    let sec_off = read_u32(data, HDR_SECTION_OFF);
    let sec_size = read_u32(data, HDR_SECTION_SIZE);
    if sec_off == 0
        || sec_size != SECTION_SIZE
        || sec_off
            .checked_add(sec_size)
            .map_or(true, |end| end > data.len())
    {
        return Err(Error::InvalidDb("section span out of bounds"));
    }
    let sec = &data[sec_off..sec_off + sec_size];
    let pair = |off: usize| (read_u32(sec, off), read_u32(sec, off + 4));
    let quad = |off: usize| TableFields {
        starts: read_u32(sec, off),
        ends: read_u32(sec, off + 4),
        labels: read_u32(sec, off + 8),
        count: read_u32(sec, off + 12),
    };
    Ok(SectionFields {
        country_labels: pair(SEC_COUNTRY_LABELS),
        cn_labels: pair(SEC_CN_LABELS),
        provider_labels: pair(SEC_PROVIDER_LABELS),
        country: quad(SEC_COUNTRY_TABLE),
        cn_province: quad(SEC_CN_PROVINCE_TABLE),
        cn_city: quad(SEC_CN_CITY_TABLE),
        provider: quad(SEC_PROVIDER_TABLE),
    })
}

fn check_table(data: &[u8], t: &TableFields) -> Result<RangeTable> {
    let starts = Span::check::<u32>(data, t.starts, t.count)?;
    let ends = Span::check::<u32>(data, t.ends, t.count)?;
    let labels = Span::check::<u32>(data, t.labels, t.count)?;
    RangeTable::new(data, starts, ends, labels)
}

/// Byte-swap every fixed-width table region between little-endian and
/// host order. Involution: applying it twice restores the input.
fn swap_fixed_tables(data: &mut [u8], sec: &SectionFields) -> Result<()> {
    swap_u32_words(data, sec.country_labels.0, sec.country_labels.1 * 2)?;
    swap_u32_words(data, sec.cn_labels.0, sec.cn_labels.1 * 2)?;
    swap_u32_words(data, sec.provider_labels.0, sec.provider_labels.1 * 3)?;
    for t in [&sec.country, &sec.cn_province, &sec.cn_city, &sec.provider] {
        swap_u32_words(data, t.starts, t.count)?;
        swap_u32_words(data, t.ends, t.count)?;
        swap_u32_words(data, t.labels, t.count)?;
    }
    Ok(())
}

/// Byte-swap a simulated big-endian image back and forth. Test hook for
/// endian-parity checks; the open path goes through the same swap.
#[cfg(test)]
pub(crate) fn byte_swap_tables(data: &mut [u8]) -> Result<()> {
    read_header(data)?;
    let sec = read_section(data)?;
    swap_fixed_tables(data, &sec)
}

fn swap_u32_words(data: &mut [u8], off: usize, words: usize) -> Result<()> {
    if words == 0 {
        return Ok(());
    }
    let bytes = words
        .checked_mul(4)
        .ok_or(Error::InvalidDb("swap region overflow"))?;
    let end = off
        .checked_add(bytes)
        .ok_or(Error::InvalidDb("swap region overflow"))?;
    if off == 0 || end > data.len() {
        return Err(Error::InvalidDb("swap region out of bounds"));
    }
    for word in data[off..end].chunks_exact_mut(4) {
        word.swap(0, 3);
        word.swap(1, 2);
    }
    Ok(())
}
