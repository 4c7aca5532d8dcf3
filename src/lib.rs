//! paperharvest - category-driven paper harvesting.
//!
//! A collector pages through the arXiv search API per category and writes
//! gzip NDJSON batches to object storage. A loader claims those batches and
//! loads them idempotently into content and history tables.

#![allow(clippy::should_implement_trait)]

pub mod cli;
pub mod config;
pub mod models;
pub mod repository;
pub mod schema;
pub mod search;
pub mod services;
pub mod storage;
