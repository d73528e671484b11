//! # nvkv Demo Binary
//!
//! Small demonstration session against a pool file: put a few pairs, read
//! them back, run counts, range scans and ordered navigation, print stats.
//!
//! ## Usage
//!
//! ```bash
//! # Open or create a pool
//! nvkv /tmp/demo.pool
//!
//! # Force re-creation with a custom size
//! nvkv --create --size 16777216 /tmp/demo.pool
//!
//! # Verbose engine logging
//! RUST_LOG=debug nvkv /tmp/demo.pool
//! ```

use std::env;

use eyre::{bail, Result, WrapErr};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nvkv::{Config, Db, TREE_ENGINE};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nvkv=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();

    let mut path: Option<String> = None;
    let mut force_create = false;
    let mut size: Option<u64> = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--create" => force_create = true,
            "--size" => {
                let value = iter
                    .next()
                    .ok_or_else(|| eyre::eyre!("--size requires a value"))?;
                size = Some(value.parse().wrap_err("--size must be a byte count")?);
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("nvkv {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other if other.starts_with('-') => bail!("unknown option: {other}"),
            other => path = Some(other.to_string()),
        }
    }

    let Some(path) = path else {
        print_usage();
        return Ok(());
    };

    let mut config = Config::new();
    config.put_string("path", &path);
    if let Some(size) = size {
        config.put_uint64("size", size);
    }
    if force_create {
        config.put_uint64("force_create", 1);
    }

    let db = Db::open(TREE_ENGINE, &config)
        .map_err(|e| eyre::eyre!("open failed: {e} ({})", nvkv::errormsg()))?;

    println!("putting key1=value1, key2=value2, key3=value3");
    db.put(b"key1", b"value1").map_err(to_eyre)?;
    db.put(b"key2", b"value2").map_err(to_eyre)?;
    db.put(b"key3", b"value3").map_err(to_eyre)?;

    let value = db.get_value(b"key1").map_err(to_eyre)?;
    println!("get key1 -> {}", String::from_utf8_lossy(&value));

    println!("count_all -> {}", db.count_all().map_err(to_eyre)?);

    println!("scanning all pairs:");
    db.get_all(|key, value| {
        println!(
            "  {} = {}",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        );
        0
    })
    .map_err(to_eyre)?;

    if let Some((key, _)) = db.get_begin().map_err(to_eyre)? {
        println!("first key -> {}", String::from_utf8_lossy(&key));
    }
    if let Some((key, _)) = db.upper_bound(b"key1").map_err(to_eyre)? {
        println!("upper_bound(key1) -> {}", String::from_utf8_lossy(&key));
    }

    db.remove(b"key2").map_err(to_eyre)?;
    println!("removed key2; count_all -> {}", db.count_all().map_err(to_eyre)?);

    let analysis = db.analyze().map_err(to_eyre)?;
    println!(
        "stats: {} leaves ({} empty, {} preallocated), pool {} bytes at {}",
        analysis.leaf_total,
        analysis.leaf_empty,
        analysis.leaf_prealloc,
        analysis.size,
        analysis.path.display()
    );

    Ok(())
}

fn to_eyre(err: nvkv::KvError) -> eyre::Report {
    eyre::eyre!("{err} [{}]", err.status())
}

fn print_usage() {
    println!("nvkv - persistent ordered key-value store demo");
    println!();
    println!("Usage:");
    println!("  nvkv [--create] [--size BYTES] <pool-file>");
    println!();
    println!("Options:");
    println!("  --create        always (re)create the pool file");
    println!("  --size BYTES    pool size on creation (default 8 MiB)");
    println!("  --help, -h      show this help");
    println!("  --version, -V   show version");
}
