//! Label-table TSV exporters.
//!
//! Dumps the full id -> label mappings of an open database, one table per
//! call, tab-separated with a header row. Useful for wiring label ids
//! from [`LookupIds`](crate::LookupIds) into external systems.

use std::io::{self, BufWriter, Write};

use crate::binary::Db;

impl Db {
    /// Write the `country_id -> (code, name)` table.
    pub fn export_country_tsv<W: Write>(&self, w: W) -> io::Result<()> {
        let mut w = BufWriter::new(w);
        writeln!(w, "country_id\tcountry_code\tcountry_name")?;
        for id in 0..self.country_label_count() {
            if let Some((code, name)) = self.country_by_id(id) {
                writeln!(w, "{id}\t{code}\t{name}")?;
            }
        }
        w.flush()
    }

    /// Write the `cn_province_id -> (code, name)` table.
    pub fn export_cn_province_tsv<W: Write>(&self, w: W) -> io::Result<()> {
        self.export_cn_tsv(w, true)
    }

    /// Write the `cn_city_id -> (code, name)` table.
    pub fn export_cn_city_tsv<W: Write>(&self, w: W) -> io::Result<()> {
        self.export_cn_tsv(w, false)
    }

    fn export_cn_tsv<W: Write>(&self, w: W, province: bool) -> io::Result<()> {
        let mut w = BufWriter::new(w);
        if province {
            writeln!(w, "cn_province_id\tcn_province_code\tcn_province_name")?;
        } else {
            writeln!(w, "cn_city_id\tcn_city_code\tcn_city_name")?;
        }
        for id in 0..self.cn_label_count() {
            let Some((code, name)) = self.cn_by_id(id) else {
                continue;
            };
            let is_province = code.ends_with("0000");
            let is_city = code.ends_with("00") && !is_province;
            if (province && !is_province) || (!province && !is_city) {
                continue;
            }
            writeln!(w, "{id}\t{code}\t{name}")?;
        }
        w.flush()
    }

    /// Write the `provider_id -> (key, name, kind)` table.
    pub fn export_provider_tsv<W: Write>(&self, w: W) -> io::Result<()> {
        let mut w = BufWriter::new(w);
        writeln!(w, "provider_id\tprovider_key\tprovider_name\tprovider_kind")?;
        for id in 0..self.provider_label_count() {
            if let Some((key, name, kind)) = self.provider_by_id(id) {
                writeln!(w, "{id}\t{key}\t{name}\t{}", kind.as_u32())?;
            }
        }
        w.flush()
    }
}
