//! Database builder: plaintext CIDR lists in, one binary file out.
//!
//! The builder reads per-category source files, interns every label
//! string once, converts CIDRs to closed ranges, merges overlapping or
//! adjacent same-file ranges, validates that no two different labels
//! overlap within a category, and serializes the result little-endian.
//! The output file is written atomically.

use std::fs;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::AHashMap;
use ipnet::IpNet;
use log::{debug, info};

use super::format::*;
use crate::cidr::cidr_to_range;
use crate::names::{is_cloud_vendor, provider_display_name};
use crate::strings::StringInterner;
use crate::{Error, ProviderKind, Result};

/// A closed range tagged with its label id.
#[derive(Debug, Clone, Copy)]
struct TaggedRange {
    start: u32,
    end: u32,
    label: u32,
}

/// Build a database file from a repository-style data directory.
///
/// Expected inputs:
/// - `<data_dir>/country/<CC>.txt` — ISO 3166-1 alpha-2 code
/// - `<data_dir>/cncity/<CODE>.txt` — CN admin code, 6 digits
/// - `<data_dir>/isp/<KEY>.txt` — provider key
///
/// Each file holds one IPv4 CIDR per line; blank lines are allowed and
/// IPv6 CIDRs are skipped. Missing category directories are treated as
/// empty. Malformed CIDRs and cross-label overlaps abort the build.
pub fn build(data_dir: impl AsRef<Path>, out_path: impl AsRef<Path>) -> Result<()> {
    let bytes = build_to_vec(data_dir.as_ref())?;
    let out_path = out_path.as_ref();

    // Write next to the target and persist over it so readers never see
    // a partial file.
    let dir = match out_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.persist(out_path).map_err(|e| Error::Io(e.error))?;

    info!("wrote {} ({} bytes)", out_path.display(), bytes.len());
    Ok(())
}

/// Build the database image in memory.
pub(crate) fn build_to_vec(data_dir: &Path) -> Result<Vec<u8>> {
    let mut b = Builder::default();
    b.scan_country(&data_dir.join("country"))?;
    b.scan_cncity(&data_dir.join("cncity"))?;
    b.scan_provider(&data_dir.join("isp"))?;
    b.encode()
}

#[derive(Default)]
struct Builder {
    strings: StringInterner,

    country_label_ids: AHashMap<String, u32>,
    cn_label_ids: AHashMap<String, u32>,
    provider_label_ids: AHashMap<String, u32>,

    country_labels: Vec<PairLabel>,
    cn_labels: Vec<PairLabel>,
    provider_labels: Vec<ProviderLabel>,

    country: Vec<TaggedRange>,
    cn_province: Vec<TaggedRange>,
    cn_city: Vec<TaggedRange>,
    provider: Vec<TaggedRange>,
}

impl Builder {
    fn scan_country(&mut self, dir: &Path) -> Result<()> {
        let files = txt_files(dir)?;
        let mut ranges = 0usize;
        for path in &files {
            let Some(code) = file_stem(path) else { continue };
            if code.len() != 2 {
                continue;
            }
            let code = code.to_owned();
            let label = self.country_label(&code);
            let rs = read_cidr_ranges(path)?;
            debug!("country {code}: {} ranges", rs.len());
            ranges += rs.len();
            self.country.extend(rs.iter().map(|&(start, end)| TaggedRange {
                start,
                end,
                label,
            }));
        }
        info!("country: {} files, {ranges} ranges", files.len());
        Ok(())
    }

    fn scan_cncity(&mut self, dir: &Path) -> Result<()> {
        let files = txt_files(dir)?;
        let mut ranges = 0usize;
        for path in &files {
            let Some(code) = file_stem(path) else { continue };
            if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            // Admin-code convention: xx0000 is a province, xxxx00 a city,
            // anything else is not an ingestable level.
            let is_province = code.ends_with("0000");
            let is_city = code.ends_with("00") && !is_province;
            if !is_province && !is_city {
                continue;
            }
            let code = code.to_owned();
            let label = self.cn_label(&code);
            let rs = read_cidr_ranges(path)?;
            debug!("cncity {code}: {} ranges", rs.len());
            ranges += rs.len();
            let dst = if is_city {
                &mut self.cn_city
            } else {
                &mut self.cn_province
            };
            dst.extend(rs.iter().map(|&(start, end)| TaggedRange {
                start,
                end,
                label,
            }));
        }
        info!("cncity: {} files, {ranges} ranges", files.len());
        Ok(())
    }

    fn scan_provider(&mut self, dir: &Path) -> Result<()> {
        let files = txt_files(dir)?;
        let mut ranges = 0usize;
        for path in &files {
            let Some(key) = file_stem(path) else { continue };
            if key.is_empty() {
                continue;
            }
            let key = key.to_owned();
            let label = self.provider_label(&key);
            let rs = read_cidr_ranges(path)?;
            debug!("provider {key}: {} ranges", rs.len());
            ranges += rs.len();
            self.provider.extend(rs.iter().map(|&(start, end)| TaggedRange {
                start,
                end,
                label,
            }));
        }
        info!("provider: {} files, {ranges} ranges", files.len());
        Ok(())
    }

    fn country_label(&mut self, code: &str) -> u32 {
        if let Some(&id) = self.country_label_ids.get(code) {
            return id;
        }
        let id = self.country_labels.len() as u32;
        // No bundled name table; the name falls back to the code.
        let rec = PairLabel {
            code: self.strings.intern(code),
            name: self.strings.intern(code),
        };
        self.country_label_ids.insert(code.to_owned(), id);
        self.country_labels.push(rec);
        id
    }

    fn cn_label(&mut self, code: &str) -> u32 {
        if let Some(&id) = self.cn_label_ids.get(code) {
            return id;
        }
        let id = self.cn_labels.len() as u32;
        let rec = PairLabel {
            code: self.strings.intern(code),
            name: self.strings.intern(code),
        };
        self.cn_label_ids.insert(code.to_owned(), id);
        self.cn_labels.push(rec);
        id
    }

    fn provider_label(&mut self, key: &str) -> u32 {
        if let Some(&id) = self.provider_label_ids.get(key) {
            return id;
        }
        let name = provider_display_name(key).unwrap_or(key);
        let kind = if is_cloud_vendor(key) {
            ProviderKind::Cloud
        } else {
            ProviderKind::Isp
        };
        let id = self.provider_labels.len() as u32;
        let rec = ProviderLabel {
            key: self.strings.intern(key),
            name: self.strings.intern(name),
            kind: kind.as_u32(),
        };
        self.provider_label_ids.insert(key.to_owned(), id);
        self.provider_labels.push(rec);
        id
    }

    fn encode(mut self) -> Result<Vec<u8>> {
        for table in [
            &mut self.country,
            &mut self.cn_province,
            &mut self.cn_city,
            &mut self.provider,
        ] {
            table.sort_by_key(|r| r.start);
        }

        let country_code = |id: u32| {
            self.strings
                .resolve(self.country_labels[id as usize].code)
                .to_owned()
        };
        let cn_code = |id: u32| {
            self.strings
                .resolve(self.cn_labels[id as usize].code)
                .to_owned()
        };
        let provider_key = |id: u32| {
            self.strings
                .resolve(self.provider_labels[id as usize].key)
                .to_owned()
        };
        validate_disjoint("country", &self.country, &country_code)?;
        validate_disjoint("cn province", &self.cn_province, &cn_code)?;
        validate_disjoint("cn city", &self.cn_city, &cn_code)?;
        validate_disjoint("provider", &self.provider, &provider_key)?;

        // Gaps stay gaps: densifying (filling them with sentinel labels)
        // inflates the tables and hurts cache locality on this dataset.
        // The reader still detects dense tables if a future builder
        // emits them.

        let strings_blob = self.strings.encode();

        let mut buf = Vec::with_capacity(16 * 1024);
        buf.resize(HEADER_SIZE, 0);

        let strings_off = buf.len() as u32;
        buf.extend_from_slice(&strings_blob);
        let strings_size = strings_blob.len() as u32;

        // Pad so every later fixed-width table is 4-byte aligned for the
        // reader's in-place typed views on strict-alignment hosts.
        let pad = buf.len().wrapping_neg() & 7;
        buf.resize(buf.len() + pad, 0);

        let section_off = buf.len();
        buf.resize(buf.len() + SECTION_SIZE, 0);

        let country_labels = write_u32s(
            &mut buf,
            self.country_labels.iter().flat_map(|l| [l.code, l.name]),
        );
        let cn_labels = write_u32s(
            &mut buf,
            self.cn_labels.iter().flat_map(|l| [l.code, l.name]),
        );
        let provider_labels = write_u32s(
            &mut buf,
            self.provider_labels
                .iter()
                .flat_map(|l| [l.key, l.name, l.kind]),
        );

        let country = write_table(&mut buf, &self.country);
        let cn_province = write_table(&mut buf, &self.cn_province);
        let cn_city = write_table(&mut buf, &self.cn_city);
        let provider = write_table(&mut buf, &self.provider);

        // Header.
        buf[0..4].copy_from_slice(&MAGIC);
        buf[HDR_VERSION..HDR_VERSION + 2].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        buf[HDR_BUILD_TIME..HDR_BUILD_TIME + 8].copy_from_slice(&now.to_le_bytes());
        put_u32(&mut buf, HDR_STRINGS_OFF, strings_off);
        put_u32(&mut buf, HDR_STRINGS_SIZE, strings_size);
        put_u32(&mut buf, HDR_SECTION_OFF, section_off as u32);
        put_u32(&mut buf, HDR_SECTION_SIZE, SECTION_SIZE as u32);
        // Remaining header bytes stay reserved (zero).

        // Section header.
        let pair = |buf: &mut Vec<u8>, at: usize, off: u32, count: usize| {
            put_u32(buf, section_off + at, off);
            put_u32(buf, section_off + at + 4, count as u32);
        };
        pair(&mut buf, SEC_COUNTRY_LABELS, country_labels, self.country_labels.len());
        pair(&mut buf, SEC_CN_LABELS, cn_labels, self.cn_labels.len());
        pair(
            &mut buf,
            SEC_PROVIDER_LABELS,
            provider_labels,
            self.provider_labels.len(),
        );
        let quad = |buf: &mut Vec<u8>, at: usize, t: (u32, u32, u32, u32)| {
            put_u32(buf, section_off + at, t.0);
            put_u32(buf, section_off + at + 4, t.1);
            put_u32(buf, section_off + at + 8, t.2);
            put_u32(buf, section_off + at + 12, t.3);
        };
        quad(&mut buf, SEC_COUNTRY_TABLE, country);
        quad(&mut buf, SEC_CN_PROVINCE_TABLE, cn_province);
        quad(&mut buf, SEC_CN_CITY_TABLE, cn_city);
        quad(&mut buf, SEC_PROVIDER_TABLE, provider);

        Ok(buf)
    }
}

/// All `*.txt` files in a directory, sorted for stable label ids.
/// A missing directory is an empty category.
fn txt_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |e| e == "txt") && path.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem()?.to_str()
}

/// Read one source file into per-file merged `(start, end)` ranges.
fn read_cidr_ranges(path: &Path) -> Result<Vec<(u32, u32)>> {
    let text = fs::read_to_string(path)?;
    let mut out = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<IpNet>() {
            Ok(IpNet::V4(net)) => out.push(cidr_to_range(&net)),
            // IPv4 database; v6 entries in shared source lists are fine.
            Ok(IpNet::V6(_)) => continue,
            Err(_) => {
                return Err(Error::InvalidCidr {
                    path: path.to_path_buf(),
                    line: line.to_owned(),
                })
            }
        }
    }

    // Merge overlapping and adjacent ranges.
    out.sort_unstable_by_key(|&(start, _)| start);
    let mut merged: Vec<(u32, u32)> = Vec::with_capacity(out.len());
    for (start, end) in out {
        match merged.last_mut() {
            Some(last) if start <= last.1.saturating_add(1) => {
                if end > last.1 {
                    last.1 = end;
                }
            }
            _ => merged.push((start, end)),
        }
    }
    Ok(merged)
}

/// Overlapping entries must agree on their label; same-label overlap is
/// tolerated because per-file merging already collapsed it within one
/// source file.
fn validate_disjoint(
    category: &'static str,
    entries: &[TaggedRange],
    label_code: &dyn Fn(u32) -> String,
) -> Result<()> {
    for pair in entries.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        if cur.start <= prev.end && cur.label != prev.label {
            return Err(Error::RangeOverlap {
                category,
                prev_start: Ipv4Addr::from(prev.start),
                prev_end: Ipv4Addr::from(prev.end),
                prev_label: label_code(prev.label),
                cur_start: Ipv4Addr::from(cur.start),
                cur_end: Ipv4Addr::from(cur.end),
                cur_label: label_code(cur.label),
            });
        }
    }
    Ok(())
}

fn write_u32s(buf: &mut Vec<u8>, values: impl Iterator<Item = u32>) -> u32 {
    let off = buf.len() as u32;
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    off
}

/// Emit one interval table as three packed arrays; returns
/// `(starts_off, ends_off, labels_off, count)`.
fn write_table(buf: &mut Vec<u8>, entries: &[TaggedRange]) -> (u32, u32, u32, u32) {
    let starts = write_u32s(buf, entries.iter().map(|r| r.start));
    let ends = write_u32s(buf, entries.iter().map(|r| r.end));
    let labels = write_u32s(buf, entries.iter().map(|r| r.label));
    (starts, ends, labels, entries.len() as u32)
}

fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_cidr_ranges_merges_adjacent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CN.txt");
        fs::write(&path, "1.0.0.0/24\n\n1.0.1.0/24\n2.0.0.0/24\n").unwrap();

        let rs = read_cidr_ranges(&path).unwrap();
        assert_eq!(rs, vec![(0x01000000, 0x010001ff), (0x02000000, 0x020000ff)]);
    }

    #[test]
    fn test_read_cidr_ranges_merges_overlap_and_masks_host_bits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        // Second line is contained in the first; third has host bits set.
        fs::write(&path, "10.0.0.0/8\n10.1.0.0/16\n10.255.255.1/16\n").unwrap();

        let rs = read_cidr_ranges(&path).unwrap();
        assert_eq!(rs, vec![(0x0a000000, 0x0affffff)]);
    }

    #[test]
    fn test_read_cidr_ranges_skips_ipv6() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        fs::write(&path, "2001:db8::/32\n1.2.3.0/24\n").unwrap();

        let rs = read_cidr_ranges(&path).unwrap();
        assert_eq!(rs, vec![(0x01020300, 0x010203ff)]);
    }

    #[test]
    fn test_read_cidr_ranges_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        fs::write(&path, "1.2.3.0/24\nnot-a-cidr\n").unwrap();

        match read_cidr_ranges(&path) {
            Err(Error::InvalidCidr { line, .. }) => assert_eq!(line, "not-a-cidr"),
            other => panic!("expected InvalidCidr, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_disjoint_allows_same_label_overlap() {
        let entries = [
            TaggedRange { start: 0, end: 100, label: 1 },
            TaggedRange { start: 50, end: 80, label: 1 },
        ];
        let name = |_: u32| "x".to_owned();
        assert!(validate_disjoint("test", &entries, &name).is_ok());
    }

    #[test]
    fn test_validate_disjoint_rejects_cross_label_overlap() {
        let entries = [
            TaggedRange { start: 0, end: 100, label: 1 },
            TaggedRange { start: 50, end: 200, label: 2 },
        ];
        let name = |id: u32| format!("label{id}");
        let err = validate_disjoint("test", &entries, &name).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("overlap"), "{msg}");
        assert!(msg.contains("label1") && msg.contains("label2"), "{msg}");
    }

    #[test]
    fn test_missing_category_dirs_build_empty_db() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = build_to_vec(dir.path()).unwrap();
        assert_eq!(&bytes[0..4], &MAGIC);
        assert!(bytes.len() >= HEADER_SIZE + SECTION_SIZE);
    }
}
