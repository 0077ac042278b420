//! End-to-end tests at the database operation level.
//!
//! Each test file covers a specific scenario, driving bulk load, lookup,
//! read-back, removal and reopen against real paged files in a temporary
//! directory.

#![cfg(test)]

mod helpers;

mod test_bulk_load;
mod test_directory_growth;
mod test_lookup_scenario;
mod test_multi_file;
mod test_remove_reclaims;
mod test_reopen;
