// ABOUTME: Library module for webapp-dba
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod commands;
pub mod config;
pub mod error;
pub mod loader;
pub mod models;
pub mod postgres;
pub mod schema;
pub mod serializer;
pub mod session;
pub mod utils;
