#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::process;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stackdb::config::DatabaseConfig;
use stackdb::types::Value128;
use stackdb::{CommitOutcome, Database, ReadStringOptions, StringEncoding};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: stackdb <command>

commands:
  put <key-hex> <text>     append text to a key
  get <key-hex> [encoding] print the text stored under a key
  size <key-hex>           print the byte size of a key
  check                    verify the tree and print its shape
  dump                     print every branch of the tree
  fill <count> <seed>      append random text to random keys";

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stackdb=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{USAGE}");
        process::exit(2);
    }

    let config = match DatabaseConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };
    info!(
        "Loaded configuration: database_directory={}, node_size_limit={}",
        config.database_directory.display(),
        config.node_size_limit
    );

    if let Err(e) = std::fs::create_dir_all(&config.database_directory) {
        error!("Failed to create data directory: {e}");
        process::exit(1);
    }

    let db = match Database::open_or_create(&config.database_directory, config.node_size_limit) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {e}");
            process::exit(1);
        }
    };

    if let Err(message) = run(&db, &args) {
        error!("{message}");
        process::exit(1);
    }
}

fn run(db: &Database, args: &[String]) -> Result<(), String> {
    let arg = |i: usize| args.get(i).map(String::as_str);
    match (arg(0), arg(1), arg(2)) {
        (Some("put"), Some(key), Some(text)) => put(db, parse_key(key)?, text),
        (Some("get"), Some(key), encoding) => get(db, parse_key(key)?, encoding.unwrap_or("utf-8")),
        (Some("size"), Some(key), None) => {
            let txn = db.begin().map_err(|e| e.to_string())?;
            let size = txn.key_size(parse_key(key)?).map_err(|e| e.to_string())?;
            println!("{size}");
            Ok(())
        }
        (Some("check"), None, None) => {
            let txn = db.begin().map_err(|e| e.to_string())?;
            let report = txn.check_tree_integrity().map_err(|e| e.to_string())?;
            println!("{report:#?}");
            Ok(())
        }
        (Some("dump"), None, None) => {
            let txn = db.begin().map_err(|e| e.to_string())?;
            print!("{}", txn.dump_tree_branches().map_err(|e| e.to_string())?);
            Ok(())
        }
        (Some("fill"), Some(count), Some(seed)) => {
            let count = count.parse::<usize>().map_err(|e| format!("bad count '{count}': {e}"))?;
            let seed = seed.parse::<u64>().map_err(|e| format!("bad seed '{seed}': {e}"))?;
            fill(db, count, seed)
        }
        _ => Err(format!("unrecognized command\n{USAGE}")),
    }
}

fn parse_key(hex: &str) -> Result<Value128, String> {
    Value128::from_hex(hex).ok_or_else(|| format!("'{hex}' is not a key of up to 32 hex digits"))
}

fn put(db: &Database, key: Value128, text: &str) -> Result<(), String> {
    let txn = db.begin().map_err(|e| e.to_string())?;
    let mut value = txn.value(key).map_err(|e| e.to_string())?;
    value.set_position(-1).map_err(|e| e.to_string())?;
    value.write_string(text).map_err(|e| e.to_string())?;
    match txn.commit().map_err(|e| e.to_string())? {
        CommitOutcome::Committed { root } => info!("committed {key} at root {root}"),
        CommitOutcome::NoChanges => info!("nothing to commit"),
    }
    Ok(())
}

fn get(db: &Database, key: Value128, encoding: &str) -> Result<(), String> {
    let encoding = StringEncoding::from_label(encoding).map_err(|e| e.to_string())?;
    let txn = db.begin().map_err(|e| e.to_string())?;
    let mut value = txn.value(key).map_err(|e| e.to_string())?;
    let text = value
        .read_string(ReadStringOptions {
            encoding,
            ..ReadStringOptions::default()
        })
        .map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}

fn fill(db: &Database, count: usize, seed: u64) -> Result<(), String> {
    let mut rng = StdRng::seed_from_u64(seed);
    let txn = db.begin().map_err(|e| e.to_string())?;
    for _ in 0..count {
        let key = Value128::from_parts(0, rng.random_range(1..=64));
        let len = rng.random_range(1..=200);
        let text: String = (0..len).map(|_| char::from(rng.random_range(b'a'..=b'z'))).collect();
        let mut value = txn.value(key).map_err(|e| e.to_string())?;
        value.set_position(-1).map_err(|e| e.to_string())?;
        value.write_string(&text).map_err(|e| e.to_string())?;
    }
    let report = txn.check_tree_integrity().map_err(|e| e.to_string())?;
    info!(
        "filled {count} values: {} bytes in {} leaves, depth {}",
        report.data_size, report.leaf_count, report.depth
    );
    txn.commit().map_err(|e| e.to_string())?;
    Ok(())
}
