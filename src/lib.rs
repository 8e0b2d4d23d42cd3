//! # issue-search
//!
//! An HTTP service that builds full-text indexes over issue-tracker projects
//! and answers searches reranked by model label confidence.
//!
//! ## Architecture
//!
//! ```text
//!   POST /create-index                        POST /search
//!          │                                        │
//!          ▼                                        ▼
//!   ┌──────────────┐   try_acquire / busy   ┌──────────────┐
//!   │ IndexBuilder │◄──── Exclusivity ─────►│ SearchEngine │
//!   └──────┬───────┘         Gate           └──────┬───────┘
//!          │ issues + predictions                  │ covering record
//!          ▼                                       ▼
//!   ┌──────────────┐  upsert after commit   ┌──────────────┐
//!   │  IssueIndex  │───────────────────────►│   Registry   │
//!   │  (tantivy)   │◄───────────────────────│ (JSON file)  │
//!   └──────────────┘     lexical hits       └──────────────┘
//!                           │
//!                           ▼
//!            join comments + attachments
//!                           │
//!                           ▼
//!   composite = w_s·s + (1-w_s)·[α·issue + (1-α)·comments]
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for paths, collaborators and ranking
//! - [`error`] - `ServiceError`, the failure kinds reported to the front end
//! - [`models`] - Shared data types: selections, issues, records, results, requests
//! - [`gate`] - Non-blocking process-wide gate serializing builds and searches
//! - [`index::identity`] - Deterministic index identities and coverage checks
//! - [`index::registry`] - Durable registry of built indexes
//! - [`index::builder`] - Full index (re)builds from the issue source
//! - [`search::bm25`] - Per-identity issue index powered by tantivy
//! - [`search::rerank`] - Composite score and comment-weight table
//! - [`search::engine`] - Retrieval, collaborator joins and reranking
//! - [`sources`] - Collaborator traits with HTTP and in-memory implementations
//! - [`api`] - Axum HTTP handlers for the front-end protocol
//! - [`state`] - Shared application state

pub mod api;
pub mod config;
pub mod error;
pub mod gate;
pub mod index;
pub mod models;
pub mod search;
pub mod sources;
pub mod state;
