//! End-to-end integration tests: build a database file from a data
//! directory, open it through the mmap path, and query it.

use std::fs;
use std::path::{Path, PathBuf};

use ipl4::{Db, Error, ProviderKind, LABEL_NONE};
use tempfile::TempDir;

/// Write a data directory from `(relative path, contents)` pairs and
/// return it together with a path for the output file.
fn data_dir(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    for (rel, content) in files {
        let path = dir.path().join("data").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    let out = dir.path().join("ipl4.db");
    (dir, out)
}

fn build_and_open(files: &[(&str, &str)]) -> (TempDir, Db) {
    let (dir, out) = data_dir(files);
    ipl4::build(dir.path().join("data"), &out).unwrap();
    let db = Db::open(&out).unwrap();
    (dir, db)
}

#[test]
fn test_country_only_build() {
    let (_dir, db) = build_and_open(&[("country/CN.txt", "1.0.1.0/24\n")]);

    let hit = db.lookup("1.0.1.128").unwrap().expect("should match");
    assert_eq!(hit.country_code, "CN");
    assert_eq!(hit.provider_key, "");
    assert_eq!(hit.cn_city_code, "");
    assert_eq!(hit.cn_province_code, "");

    assert!(db.lookup("2.0.0.1").unwrap().is_none());
}

#[test]
fn test_cloud_provider_fast_path() {
    let (_dir, db) = build_and_open(&[("isp/aliyun.txt", "8.130.0.0/15\n")]);

    let (id, kind) = db.provider_id_u32(0x0882_0003).expect("should match");
    assert_eq!(kind, ProviderKind::Cloud);
    assert_ne!(id, LABEL_NONE);

    let (key, _name, kind) = db.provider_by_id(id).unwrap();
    assert_eq!(key, "aliyun");
    assert_eq!(kind, ProviderKind::Cloud);

    // The parsed-address entry point agrees.
    let via_addr = db.provider_id("8.130.0.3".parse().unwrap()).unwrap();
    assert_eq!(via_addr, Some((id, ProviderKind::Cloud)));
}

#[test]
fn test_city_shadowing_province() {
    let (_dir, db) = build_and_open(&[
        ("cncity/440000.txt", "1.2.3.0/24\n"),
        ("cncity/440300.txt", "1.2.3.0/25\n"),
    ]);

    let hit = db.lookup("1.2.3.10").unwrap().unwrap();
    assert_eq!(hit.cn_city_code, "440300");
    assert_eq!(hit.cn_province_code, "");

    let hit = db.lookup("1.2.3.200").unwrap().unwrap();
    assert_eq!(hit.cn_province_code, "440000");
    assert_eq!(hit.cn_city_code, "");

    let ids = db.lookup_ids("1.2.3.10").unwrap().unwrap();
    assert_ne!(ids.cn_city_id, LABEL_NONE);
    assert_eq!(ids.cn_province_id, LABEL_NONE);
}

#[test]
fn test_conflicting_providers_fail_build() {
    let (dir, out) = data_dir(&[
        ("isp/aliyun.txt", "10.0.0.0/8\n"),
        ("isp/tencent.txt", "10.0.0.0/8\n"),
    ]);
    let err = ipl4::build(dir.path().join("data"), &out).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("overlap"), "{msg}");
    assert!(msg.contains("aliyun") && msg.contains("tencent"), "{msg}");
    assert!(!out.exists(), "failed build must not leave an output file");
}

#[test]
fn test_provider_cidr_listing() {
    let (_dir, db) = build_and_open(&[("isp/aliyun.txt", "8.130.0.0/15\n")]);
    let cidrs = db.cloud_cidrs("aliyun").unwrap();
    let strs: Vec<String> = cidrs.iter().map(|c| c.to_string()).collect();
    assert_eq!(strs, ["8.130.0.0/15"]);
}

#[test]
fn test_empty_database() {
    let (_dir, db) = build_and_open(&[]);
    assert!(db.lookup("0.0.0.0").unwrap().is_none());
    assert!(db.lookup("255.255.255.255").unwrap().is_none());
    assert!(db.lookup_ids("0.0.0.0").unwrap().is_none());
    assert!(db.provider_id_u32(0).is_none());
    assert!(matches!(
        db.provider_cidrs("aliyun"),
        Err(Error::UnknownVendor(_))
    ));
}

#[test]
fn test_open_missing_file() {
    assert!(matches!(
        Db::open("/nonexistent/ipl4.db"),
        Err(Error::Io(_))
    ));
}

#[test]
fn test_open_rejects_garbage_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.db");
    fs::write(&path, vec![0u8; 4096]).unwrap();
    assert!(matches!(Db::open(&path), Err(Error::InvalidDb(_))));
}

#[test]
fn test_malformed_cidr_aborts_build() {
    let (dir, out) = data_dir(&[("country/CN.txt", "1.0.1.0/24\nbogus\n")]);
    let err = ipl4::build(dir.path().join("data"), &out).unwrap_err();
    assert!(matches!(err, Error::InvalidCidr { .. }), "{err}");
    assert!(err.to_string().contains("bogus"));
}

#[test]
fn test_rebuild_replaces_file_atomically() {
    let (dir, out) = data_dir(&[("country/CN.txt", "1.0.1.0/24\n")]);
    ipl4::build(dir.path().join("data"), &out).unwrap();
    let db = Db::open(&out).unwrap();
    assert!(db.lookup("1.0.1.1").unwrap().is_some());

    // Rebuild with different data over the same path while the old
    // mapping is still alive.
    fs::write(dir.path().join("data/country/CN.txt"), "9.9.9.0/24\n").unwrap();
    ipl4::build(dir.path().join("data"), &out).unwrap();

    // The old handle still answers from its own mapping.
    assert!(db.lookup("1.0.1.1").unwrap().is_some());
    drop(db);

    let db = Db::open(&out).unwrap();
    assert!(db.lookup("1.0.1.1").unwrap().is_none());
    assert!(db.lookup("9.9.9.9").unwrap().is_some());
}

#[test]
fn test_concurrent_lookups() {
    let (_dir, db) = build_and_open(&[
        ("country/CN.txt", "1.0.0.0/16\n"),
        ("isp/chinamobile.txt", "1.0.4.0/22\n"),
    ]);
    let db = std::sync::Arc::new(db);
    let mut handles = Vec::new();
    for t in 0..4 {
        let db = db.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..10_000u32 {
                let ip = 0x0100_0000 | (i.wrapping_mul(2654435761 + t) & 0xffff);
                let hit = db.lookup_u32(ip).expect("inside 1.0.0.0/16");
                assert_eq!(hit.country_code, "CN");
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_tsv_exports() {
    let (_dir, db) = build_and_open(&[
        ("country/CN.txt", "1.0.1.0/24\n"),
        ("cncity/440000.txt", "1.2.0.0/16\n"),
        ("cncity/440300.txt", "1.2.3.0/24\n"),
        ("isp/aliyun.txt", "8.130.0.0/15\n"),
    ]);

    let mut out = Vec::new();
    db.export_country_tsv(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().next(), Some("country_id\tcountry_code\tcountry_name"));
    assert!(text.lines().any(|l| l.starts_with("0\tCN\t")));

    let mut out = Vec::new();
    db.export_cn_province_tsv(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("440000"));
    assert!(!text.contains("440300"));

    let mut out = Vec::new();
    db.export_cn_city_tsv(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("440300"));
    assert!(!text.contains("440000\t"));

    let mut out = Vec::new();
    db.export_provider_tsv(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let row = text
        .lines()
        .find(|l| l.contains("aliyun"))
        .expect("aliyun row");
    assert!(row.ends_with(&format!("\t{}", ProviderKind::Cloud.as_u32())));
}

#[test]
fn test_build_default_data_layout() {
    // A fuller directory exercising every category at once.
    let (_dir, db) = build_and_open(&[
        ("country/CN.txt", "1.0.0.0/15\n27.128.0.0/13\n"),
        ("country/US.txt", "8.8.8.0/24\n"),
        ("cncity/110000.txt", "27.128.0.0/16\n"),
        ("cncity/110100.txt", "27.128.10.0/24\n"),
        ("isp/chinatelecom.txt", "27.128.0.0/14\n"),
        ("isp/cloudflare.txt", "1.1.1.0/24\n"),
    ]);

    let hit = db.lookup("27.128.10.5").unwrap().unwrap();
    assert_eq!(hit.country_code, "CN");
    assert_eq!(hit.cn_city_code, "110100");
    assert_eq!(hit.cn_province_code, "");
    assert_eq!(hit.provider_key, "chinatelecom");
    assert_eq!(hit.provider_kind, ProviderKind::Isp);

    let hit = db.lookup("27.128.200.5").unwrap().unwrap();
    assert_eq!(hit.cn_city_code, "");
    assert_eq!(hit.cn_province_code, "110000");

    let hit = db.lookup("1.1.1.1").unwrap().unwrap();
    assert_eq!(hit.country_code, "CN"); // 1.0.0.0/15 covers 1.1.1.1
    assert_eq!(hit.provider_key, "cloudflare");
    assert_eq!(hit.provider_kind, ProviderKind::Cloud);

    let hit = db.lookup("8.8.8.8").unwrap().unwrap();
    assert_eq!(hit.country_code, "US");
    assert_eq!(hit.provider_key, "");
}

/// Lifetime check: results borrow from the database, not from temporary
/// buffers, so holding many results at once is fine.
#[test]
fn test_results_borrow_from_db() {
    let (_dir, db) = build_and_open(&[("country/CN.txt", "1.0.0.0/8\n")]);
    let hits: Vec<_> = (0..100u32)
        .filter_map(|i| db.lookup_u32(0x0100_0000 + i * 7919))
        .collect();
    assert_eq!(hits.len(), 100);
    assert!(hits.iter().all(|h| h.country_code == "CN"));
}

#[test]
fn test_build_accepts_path_types() {
    let (dir, out) = data_dir(&[("country/DE.txt", "80.128.0.0/11\n")]);
    // Both &Path and PathBuf style arguments work.
    ipl4::build(dir.path().join("data").as_path(), Path::new(&out)).unwrap();
    let db = Db::open(&out).unwrap();
    assert_eq!(
        db.lookup("80.130.1.1").unwrap().unwrap().country_code,
        "DE"
    );
}
