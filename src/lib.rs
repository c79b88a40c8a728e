//! # Dialog Search Index
//!
//! Keeps a derived full-text index of dialogs in step with the primary store
//! without a long exclusive rebuild pass. Work is queued per dialog, claimed
//! in batches by any number of workers, built outside the write lock, and
//! committed together with the queue transition.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────┐   ┌──────────────┐
//! │ Seeders  │──▶│ Rebuild     │──▶│ Claimers │──▶│ Orchestrator │
//! │ full/... │   │ queue       │   │ std/stale│   │ run_cycle    │
//! └──────────┘   └─────────────┘   └──────────┘   └──────┬───────┘
//!                                                        │
//!                 ┌──────────────┐   ┌──────────┐        │
//!                 │ v_dialog_    │──▶│ Document │◀───────┤
//!                 │ content view │   │ builder  │        ▼
//!                 └──────────────┘   └──────────┘   ┌──────────────┐
//!                                                   │ dialog_search│
//!                                                   │ + FTS5       │
//!                                                   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dsi init                        # create database
//! dsi load dialogs.json           # populate the primary store
//! dsi reindex --full --workers 4  # seed and drain
//! dsi status                      # progress, rate, ETA
//! dsi search "skattemelding" --party urn:altinn:person:identifier-no:01017012345
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema: primary store, index, queue, metrics |
//! | [`models`] | Core data types |
//! | [`error`] | Library error types |
//! | [`dialogs`] | Primary store write helpers and bulk load |
//! | [`projection`] | Content source over the primary store |
//! | [`analyzer`] | Language profiles and tokenization |
//! | [`document`] | Weighted documents and the capped builder |
//! | [`index_store`] | Index rows and their FTS5 shadow |
//! | [`queue`] | Seeders, leases, sweeps |
//! | [`claim`] | Standard and stale-first claimers |
//! | [`reindex`] | Per-cycle orchestrator |
//! | [`metrics`] | Cycle samples, progress, rate, ETA |
//! | [`worker`] | Multi-worker reindex driver |
//! | [`search`] | Scoped queries against the index |
//! | [`progress`] | Reindex progress reporting |
//! | [`stats`] | Status and failure reports |

pub mod analyzer;
pub mod claim;
pub mod config;
pub mod db;
pub mod dialogs;
pub mod document;
pub mod error;
pub mod index_store;
pub mod metrics;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod projection;
pub mod queue;
pub mod reindex;
pub mod search;
pub mod stats;
pub mod worker;
