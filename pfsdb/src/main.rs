#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

//! Inspect the databases in the configured directory.
//!
//! With no arguments, lists every database. With database names, opens each
//! one and lists its stored files.

use pfsdb::DatabaseRegistry;
use pfsdb::config::PfsConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pfsdb=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match PfsConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: database_directory={}, blocks_per_file={}, btree_order={}",
        config.database_directory.display(),
        config.blocks_per_file,
        config.btree_order
    );

    if let Err(e) = std::fs::create_dir_all(&config.database_directory) {
        tracing::error!("Failed to create data directory: {e}");
        std::process::exit(1);
    }

    let registry = DatabaseRegistry::new(
        config.database_directory.clone(),
        config.database_options(),
    );

    let names: Vec<String> = std::env::args().skip(1).collect();
    if names.is_empty() {
        match registry.list_databases() {
            Ok(databases) if databases.is_empty() => tracing::info!("No databases"),
            Ok(databases) => {
                for name in databases {
                    tracing::info!("Database: {name}");
                }
            }
            Err(e) => {
                tracing::error!("Failed to list databases: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    for name in names {
        let listing = registry.get_or_create(&name).and_then(|db| {
            let db = db
                .read()
                .map_err(|_| pfsdb::storage::DatabaseError::LockPoisoned)?;
            Ok((db.file_count(), db.free_count(), db.directory_list()?))
        });
        match listing {
            Ok((file_count, free_count, fcbs)) => {
                tracing::info!(
                    "Database '{}': {} paged files, {} free blocks, {} stored files",
                    name,
                    file_count,
                    free_count,
                    fcbs.len()
                );
                for fcb in fcbs {
                    tracing::info!(
                        "  {:<20} {} {:>10} blocks",
                        fcb.name,
                        fcb.created,
                        fcb.block_count
                    );
                }
            }
            Err(e) => {
                tracing::error!("Failed to open database '{name}': {e}");
                std::process::exit(1);
            }
        }
    }
}
