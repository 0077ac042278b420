//! Registry of open databases, keyed by database name.
//!
//! This module provides a thread-safe registry that manages database instances.
//! Every caller asking for the same name shares a single `Database` instance.
//!
//! # Files
//!
//! A database named `library` lives at `{base_directory}/library.db0`, plus
//! `library.db1`, `library.db2`, ... once the first file fills up.
//!
//! # Thread Safety
//!
//! The registry uses `RwLock` instead of `Mutex` to allow concurrent database access:
//! - Multiple threads can read from the same database simultaneously
//! - Write operations acquire exclusive access
//!
//! # Invariants
//!
//! - Each database name maps to at most one `Database` instance
//! - All database names are validated before they touch the filesystem

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::storage::pointer::MAX_FILE_ID;
use crate::storage::superblock::MAX_NAME_LEN;
use crate::storage::{Database, DatabaseError, DatabaseOptions, PagedStore};

/// Extension of the first paged file of every database.
const FIRST_FILE_EXTENSION: &str = "db0";

/// Registry of open databases, keyed by name.
pub struct DatabaseRegistry {
    /// Map from database name to shared database instance.
    /// Uses `RwLock` to allow concurrent reads of the map.
    databases: RwLock<HashMap<String, Arc<RwLock<Database>>>>,
    /// Base directory where database files are stored.
    base_directory: PathBuf,
    /// Sizing of databases created through the registry.
    options: DatabaseOptions,
}

impl DatabaseRegistry {
    /// Create a new database registry.
    ///
    /// # Arguments
    ///
    /// * `base_directory` - Directory where database files will be stored.
    /// * `options` - Sizing of databases the registry creates.
    #[must_use]
    pub fn new(base_directory: PathBuf, options: DatabaseOptions) -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            base_directory,
            options,
        }
    }

    /// Get or create the database with the given name.
    ///
    /// If the database is already open, returns a reference to it.
    /// Otherwise, opens or creates its files and stores it in the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The name is not a valid database name
    /// - The registry lock is poisoned
    /// - The database cannot be opened or created
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    #[allow(clippy::significant_drop_tightening)] // False positive - we need the lock held during insert
    pub fn get_or_create(&self, name: &str) -> Result<Arc<RwLock<Database>>, DatabaseError> {
        validate_database_name(name)
            .map_err(|_| DatabaseError::InvalidDatabaseName(name.to_string()))?;

        // Fast path: check if database already exists (read lock only)
        {
            let databases = self
                .databases
                .read()
                .map_err(|_| DatabaseError::LockPoisoned)?;
            if let Some(db) = databases.get(name) {
                return Ok(Arc::clone(db));
            }
        }

        // Slow path: need to open the database (write lock)
        let mut databases = self
            .databases
            .write()
            .map_err(|_| DatabaseError::LockPoisoned)?;

        // Double-check: another thread may have opened it while we waited for the write lock
        if let Some(db) = databases.get(name) {
            return Ok(Arc::clone(db));
        }

        let database = Database::open_or_create(&self.base_directory, name, self.options)?;
        let db_arc = Arc::new(RwLock::new(database));
        databases.insert(name.to_string(), Arc::clone(&db_arc));

        tracing::info!("Opened database '{}'", name);

        Ok(db_arc)
    }

    /// Names of the databases present in the base directory, sorted.
    ///
    /// A database is present when its first paged file exists, whether or
    /// not it is open.
    pub fn list_databases(&self) -> Result<Vec<String>, DatabaseError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.base_directory).map_err(DatabaseError::Io)? {
            let path = entry.map_err(DatabaseError::Io)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FIRST_FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Close a database and delete all of its paged files.
    ///
    /// Returns the number of files deleted. The database's own lock is held
    /// while the files are deleted, so no write through an existing handle
    /// interleaves with the deletion. Handles obtained before the call must
    /// be dropped afterwards: writing through one would recreate the files.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, the database does not exist,
    /// the registry lock is poisoned, or a file cannot be deleted.
    #[allow(clippy::significant_drop_tightening)] // The database lock must outlive the deletion
    pub fn kill(&self, name: &str) -> Result<usize, DatabaseError> {
        validate_database_name(name)
            .map_err(|_| DatabaseError::InvalidDatabaseName(name.to_string()))?;

        let mut databases = self
            .databases
            .write()
            .map_err(|_| DatabaseError::LockPoisoned)?;
        if !Database::exists(&self.base_directory, name) {
            return Err(DatabaseError::DatabaseNotFound(name.to_string()));
        }
        let open = databases.remove(name);
        drop(databases);

        let _guard = open
            .as_ref()
            .map(|db| db.write().map_err(|_| DatabaseError::LockPoisoned))
            .transpose()?;
        let deleted = self.delete_files(name)?;

        tracing::info!("Deleted database '{}' ({} paged files)", name, deleted);
        Ok(deleted)
    }

    /// Delete `<name>.db0`, `<name>.db1`, ... up to the first missing file.
    fn delete_files(&self, name: &str) -> Result<usize, DatabaseError> {
        let mut deleted = 0;
        for seq in 0..=MAX_FILE_ID {
            let path = PagedStore::path_for(&self.base_directory, name, seq);
            if !path.exists() {
                break;
            }
            std::fs::remove_file(&path).map_err(DatabaseError::Io)?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

/// Error returned when validating a database name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameValidationError {
    /// The name is empty.
    Empty,
    /// The name exceeds the maximum length.
    TooLong,
    /// The name contains invalid characters.
    InvalidCharacters,
}

impl std::fmt::Display for NameValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "database name must not be empty"),
            Self::TooLong => write!(
                f,
                "database name exceeds maximum length of {MAX_NAME_LEN} characters"
            ),
            Self::InvalidCharacters => write!(
                f,
                "database name contains invalid characters; only alphanumeric, hyphens, and underscores are allowed"
            ),
        }
    }
}

impl std::error::Error for NameValidationError {}

/// Validate that a database name is well-formed.
///
/// Valid names:
/// - Are non-empty
/// - Are at most 30 characters (the superblock name field)
/// - Contain only alphanumeric characters, hyphens, and underscores
///
/// This validation prevents path traversal and ensures safe filenames.
///
/// # Examples
///
/// ```
/// use pfsdb::database_registry::validate_database_name;
///
/// assert!(validate_database_name("library-2024").is_ok());
/// assert!(validate_database_name("my_db").is_ok());
/// assert!(validate_database_name("").is_err());
/// assert!(validate_database_name("../evil").is_err());
/// ```
pub fn validate_database_name(name: &str) -> Result<(), NameValidationError> {
    if name.is_empty() {
        return Err(NameValidationError::Empty);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NameValidationError::TooLong);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(NameValidationError::InvalidCharacters);
    }
    Ok(())
}
