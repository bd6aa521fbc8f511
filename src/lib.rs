//! # Doc Relay
//!
//! A document ingestion relay for a remote semantic index.
//!
//! Doc Relay takes a batch of documents (plain text, PDF, and word-processor
//! files, usually delivered as a zip archive), splits each document's text
//! into word-bounded chunks, and pushes the chunks to a remote indexing
//! service. Small documents go out as single concurrent calls; medium and
//! large documents go out as strictly ordered, rate-limited sub-batches.
//! Every call is recorded in an in-process audit log, from which selected
//! ingestions can be compensated by a remote delete.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌────────────┐
//! │ Archive  │──▶│ Extract  │──▶│ Chunk +  │──▶│ Dispatcher │──▶ remote index
//! │  (zip)   │   │ txt/pdf/ │   │  Tier    │   │ small ∥    │
//! └──────────┘   │  docx    │   └──────────┘   │ batched ⇢  │
//!                └──────────┘                  └─────┬──────┘
//!                                                    ▼
//!                                              ┌──────────┐
//!                                              │ AuditLog │──▶ undo (remote delete)
//!                                              └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! relay ingest papers.zip --collection research --doc-type paper --dry-run
//! relay ingest papers.zip --collection research --doc-type paper --user alice
//! relay serve                   # HTTP API for uploads, audit and undo
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error types |
//! | [`archive`] | Zip unpacking with size limits and excludes |
//! | [`extract`] | Text extraction per file format |
//! | [`chunk`] | Word-bounded text chunking |
//! | [`tier`] | Size-tier classification |
//! | [`remote`] | Remote index client |
//! | [`ingest`] | Tiered concurrent dispatch |
//! | [`audit`] | Audit log and compensating undo |
//! | [`progress`] | Dispatch progress reporting |
//! | [`server`] | HTTP API |

pub mod archive;
pub mod audit;
pub mod chunk;
pub mod config;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod progress;
pub mod remote;
pub mod server;
pub mod tier;
