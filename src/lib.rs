//! # autoblockip - Synology AutoBlock deny-list filler
//!
//! Reads IP block-lists (local files or URLs), keeps every valid address and
//! every CIDR network small enough to expand, and writes them as deny entries
//! into the AutoBlock SQLite database used by DSM.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        autoblockip                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap) + Config (serde_yaml)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Fetcher (reqwest + rustls)                                 │
//! │    └── Local files and remote lists, line by line           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Classifier (ipnet)                                         │
//! │    ├── Canonical form of single addresses                   │
//! │    └── CIDR admission by prefix length, then expansion      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Reconciler                                                 │
//! │    ├── Batched sweeps (expired, clear)                      │
//! │    └── Upserts through the DenyStore trait                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SqliteStore (rusqlite)                                     │
//! │    └── AutoBlockIP table                                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use autoblockip::classifier::{Classifier, TokenFilter};
//! use autoblockip::reconcile::{ReconcileOptions, Reconciler};
//! use autoblockip::store::{DenyStore, SqliteStore};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut store = SqliteStore::open("/etc/synoautoblock.db")?;
//!
//!     let classifier = Classifier::new(24, 0, TokenFilter::Any);
//!     let reconciler = Reconciler::new(
//!         classifier,
//!         ReconcileOptions {
//!             remove_expired: true,
//!             clear_all: false,
//!             batch_size: 100_000,
//!             dry_run: false,
//!             now: chrono::Utc::now().timestamp(),
//!         },
//!     );
//!
//!     let lines = ["83.222.191.62", "10.0.0.0/30"];
//!     let summary = reconciler.run(lines, Some(&mut store as &mut dyn DenyStore));
//!     println!("{} addresses written", summary.applied_addresses);
//!     Ok(())
//! }
//! ```

pub mod backup;
pub mod batch;
pub mod canonical;
pub mod cidr;
pub mod classifier;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod lock;
pub mod reconcile;
pub mod record;
pub mod report;
pub mod store;
pub mod utils;
