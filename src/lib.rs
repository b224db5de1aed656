//! # gart
//!
//! A local, content-addressed archive indexer. Objects (inline text or
//! files) are identified by the SHA-256 of their content, tagged by the
//! user and automatically, and found again with boolean tag queries over
//! compressed bitmaps.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────────┐   ┌────────────────────────┐
//! │    CLI    │──▶│   IndexManager   │──▶│ objects.idx  (mmap)    │
//! │  (gart)   │   │  select / query  │   │ cards/xx/*.card        │
//! └───────────┘   │  index_* / tag   │   │ tagmaps/xx/*.bitmap    │
//!                 └──────────────────┘   │ tags/tagdict.dat       │
//!                                        └────────────────────────┘
//! ```
//!
//! Pure logic (OIDs, WAHL bitmaps, systemic tags, query building) lives in
//! the `gart-core` crate; everything that touches the filesystem lives here.
//!
//! ## Quick Start
//!
//! ```bash
//! gart init
//! gart add --text "Salaam" --tags greet,farsi
//! gart add --file ./notes --recursive --tags notes
//! gart find --all greet --none english
//! gart info
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`repo`] | Repository layout, `init`, discovery |
//! | [`config`] | `.gart/config.toml` parsing |
//! | [`error`] | Error taxonomy and exit codes |
//! | [`fs`] | Swap-rename writes and directory helpers |
//! | [`index`] | Object index, tagmaps, cards, and the index manager |
//! | [`tagdict`] | Tag dictionary |
//! | [`session`] | Per-invocation state for commands |
//! | [`add`], [`find`], [`tag`], [`info`], [`update`], [`verify`] | CLI commands |

pub mod add;
pub mod config;
pub mod error;
pub mod find;
pub mod fs;
pub mod index;
pub mod info;
pub mod interrupt;
pub mod output;
pub mod repo;
pub mod session;
pub mod tag;
pub mod tagdict;
pub mod update;
pub mod verify;
pub mod walk;

pub use error::{Error, Result};
