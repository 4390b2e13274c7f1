//! ipl4: CLI for building and querying IPv4 geolocation database files.

use clap::{Parser, Subcommand, ValueEnum};
use ipl4::Db;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ipl4")]
#[command(version)]
#[command(about = "Build and query IPv4 geolocation/provider database files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a data directory of CIDR lists into a database file
    Build {
        /// Data directory (country/, cncity/, isp/ subdirectories)
        #[arg(short, long, default_value = "data")]
        data: PathBuf,

        /// Output database file
        #[arg(short, long, default_value = "ipl4.db")]
        out: PathBuf,
    },

    /// Look up a single IP address
    Lookup {
        /// Database file
        #[arg(short, long, default_value = "ipl4.db")]
        db: PathBuf,

        /// IPv4 address to look up
        ip: String,
    },

    /// List all CIDRs of a cloud vendor
    Cloud {
        /// Database file
        #[arg(short, long, default_value = "ipl4.db")]
        db: PathBuf,

        /// Vendor key, e.g. aliyun
        vendor: String,
    },

    /// List all CIDRs of a provider (ISP or cloud)
    Provider {
        /// Database file
        #[arg(short, long, default_value = "ipl4.db")]
        db: PathBuf,

        /// Provider key, e.g. chinatelecom
        key: String,
    },

    /// Dump a label table as TSV
    Export {
        /// Database file
        #[arg(short, long, default_value = "ipl4.db")]
        db: PathBuf,

        /// Which label table to dump
        #[arg(short, long)]
        what: ExportWhat,

        /// Output file ("-" or omitted for stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportWhat {
    Country,
    CnProvince,
    CnCity,
    Provider,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Build { data, out } => {
            ipl4::build(&data, &out)?;
            println!("Built {} from {}", out.display(), data.display());
        }
        Commands::Lookup { db, ip } => {
            let db = Db::open(&db)?;
            match db.lookup(&ip)? {
                None => println!("no match"),
                Some(hit) => {
                    println!("ip={}", hit.ip);
                    if !hit.country_code.is_empty() {
                        println!("country={} ({})", hit.country_code, hit.country_name);
                    }
                    if !hit.cn_city_code.is_empty() {
                        println!("cn_city={} ({})", hit.cn_city_code, hit.cn_city_name);
                    } else if !hit.cn_province_code.is_empty() {
                        println!(
                            "cn_province={} ({})",
                            hit.cn_province_code, hit.cn_province_name
                        );
                    }
                    if !hit.provider_key.is_empty() {
                        println!(
                            "provider={} ({}) kind={}",
                            hit.provider_key, hit.provider_name, hit.provider_kind
                        );
                    }
                }
            }
        }
        Commands::Cloud { db, vendor } => {
            let db = Db::open(&db)?;
            for cidr in db.cloud_cidrs(&vendor)? {
                println!("{cidr}");
            }
        }
        Commands::Provider { db, key } => {
            let db = Db::open(&db)?;
            let (cidrs, _kind) = db.provider_cidrs(&key)?;
            for cidr in cidrs {
                println!("{cidr}");
            }
        }
        Commands::Export { db, what, out } => {
            let db = Db::open(&db)?;
            let w: Box<dyn Write> = match out {
                Some(p) if p != std::path::Path::new("-") => Box::new(File::create(p)?),
                _ => Box::new(io::stdout()),
            };
            match what {
                ExportWhat::Country => db.export_country_tsv(w)?,
                ExportWhat::CnProvince => db.export_cn_province_tsv(w)?,
                ExportWhat::CnCity => db.export_cn_city_tsv(w)?,
                ExportWhat::Provider => db.export_provider_tsv(w)?,
            }
        }
    }
    Ok(())
}
