//! # gart core
//!
//! Pure logic shared by the `gart` archive indexer: object identifiers,
//! checksums and file-format magics, the WAHL compressed bitmap, systemic
//! tag derivation, and the tag query builder.
//!
//! This crate performs no filesystem I/O. Everything that touches disk
//! (object index, tagmaps, cards, tag dictionary) lives in the `gart` crate
//! and builds on the types defined here.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`digest`] | SHA-256 digests, CRC-32/CRC-64, file magics |
//! | [`oid`] | 32-byte content-addressed object identifiers |
//! | [`wahl`] | 31-bit word-aligned hybrid bitmap and bitwise engine |
//! | [`systemic`] | Automatically derived tag names |
//! | [`query`] | Include/exclude tag queries |

pub mod digest;
pub mod oid;
pub mod query;
pub mod systemic;
pub mod wahl;

pub use oid::{ObjectType, Oid, OidError};
pub use query::{Query, QueryBuilder, Selection};
pub use wahl::{BitOp, Wahl, WahlError};
