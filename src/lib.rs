//! Prospect Agent Library
//!
//! Autonomous B2B prospect enrichment: discovers local companies, enriches
//! each one through a chain of external sources, merges the partial results
//! into one deduplicated prospect row, scores it and drafts an outreach
//! message.
//!
//! # Modules
//!
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `models`: Core data models (candidates, partial records, prospects).
//! - `normalize`: Company name, domain, email and phone normalization.
//! - `sources`: Source capability traits and shared HTTP helpers.
//! - `circuit_breaker`: Per-source circuit breaker.
//! - `orchestrator`: Ordered source chain with early stop.
//! - `merger`: Field-level precedence merge.
//! - `scoring`: Relevance scoring.
//! - `store`: Prospect Store trait and in-memory implementation.
//! - `db`: Database connection and pool management.
//! - `db_storage`: PostgreSQL Prospect Store.
//! - `pipeline`: Per-candidate processing.
//! - `discovery`: Candidate discovery and relevance exclusions.
//! - `scheduler`: The processing loop.
//! - `handlers`: HTTP request handlers for collaborators.
//! - `apollo_client`, `hunter_client`, `website_scraper`, `maps_client`,
//!   `serper_client`, `openai_client`, `email_verifier`: provider clients.

pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod discovery;
pub mod errors;
pub mod handlers;
pub mod merger;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod scheduler;
pub mod scoring;
pub mod sources;
pub mod store;

// External providers
pub mod apollo_client;
pub mod email_verifier;
pub mod hunter_client;
pub mod maps_client;
pub mod openai_client;
pub mod serper_client;
pub mod website_scraper;
