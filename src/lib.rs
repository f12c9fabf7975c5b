// ABOUTME: Library module for seren-transfer
// ABOUTME: Exports the dump, import and migration engine for use in the binary and tests

pub mod batcher;
pub mod codec;
pub mod commands;
pub mod config;
pub mod connection;
pub mod dump;
pub mod error;
pub mod import;
pub mod io;
pub mod job;
pub mod migration;
pub mod model;
pub mod postgres;
pub mod reader;
pub mod schema;
pub mod sqlite;
pub mod utils;
