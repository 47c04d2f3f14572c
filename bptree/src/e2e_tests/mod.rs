//! End-to-end tests against file-backed trees and indexes.
//!
//! Each test file covers a specific scenario, using deterministic inputs
//! to verify complete create, load, query and reopen cycles.

#![cfg(test)]

mod helpers;

mod test_concurrency;
mod test_deletion;
mod test_duplicates;
mod test_model;
mod test_reopen;
mod test_scenario;
mod test_value_store;
