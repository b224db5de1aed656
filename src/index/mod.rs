//! File-backed index subsystem.
//!
//! | Module | File(s) | Purpose |
//! |--------|---------|---------|
//! | [`object_index`] | `index/objects.idx` | key → OID, memory-mapped, append-only |
//! | [`tagmap`] | `index/tagmaps/xx/*.bitmap` | one WAHL bitmap of keys per tag |
//! | [`card`] | `index/cards/xx/*.card` | per-object metadata |
//! | [`manager`] | all of the above | the façade callers use |
//!
//! The tag dictionary lives beside the index in [`crate::tagdict`].

pub mod card;
pub mod manager;
pub mod object_index;
pub mod tagmap;

pub use card::{Card, CardData, CardStore};
pub use manager::{IndexManager, RebuildReport, UpdateOp, VerifyReport};
pub use object_index::{Mode, ObjectIndex};
pub use tagmap::Tagmap;
