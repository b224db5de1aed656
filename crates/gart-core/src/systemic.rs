//! Systemic tags.
//!
//! Every archived object is tagged automatically with a small set of
//! systemic tags alongside whatever the user supplies:
//!
//! | Tag | Example |
//! |-----|---------|
//! | `systemic:gart-object` | applied to every object |
//! | `systemic:ext:<ext>` | `systemic:ext:pdf`, or `systemic:ext:` when there is none |
//! | `systemic:type:<type>` | `systemic:type:text` |
//! | `systemic:day:<mmm>-<dd>-<yyyy>` | `systemic:day:oct-07-2026` |
//!
//! Systemic names share the tagmap namespace with user tags, which is what
//! lets queries filter by type, extension, or ingest day.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::oid::ObjectType;

/// Prefix shared by every systemic tag name.
pub const PREFIX: &str = "systemic:";

/// Tag applied to every object.
pub const GART_OBJECT: &str = "systemic:gart-object";

/// Path and extension of an ingested file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDetails {
    pub path: PathBuf,
    /// Extension without the leading dot; empty when the file has none.
    pub ext: String,
}

impl FileDetails {
    pub fn new(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            ext,
        }
    }
}

/// Whether `name` is in the systemic namespace.
pub fn is_systemic(name: &str) -> bool {
    name.starts_with(PREFIX)
}

/// Whether `name` is an ingest-day tag.
pub fn is_day_tag(name: &str) -> bool {
    name.starts_with("systemic:day:")
}

/// `systemic:ext:<ext>`, lower-cased and without a leading dot.
pub fn ext_tag(ext: &str) -> String {
    format!(
        "{}ext:{}",
        PREFIX,
        ext.trim_start_matches('.').to_lowercase()
    )
}

/// `systemic:type:<type>`.
pub fn type_tag(kind: ObjectType) -> String {
    format!("{}type:{}", PREFIX, kind.name())
}

/// `systemic:day:<mmm>-<dd>-<yyyy>`.
pub fn day_tag(day: NaiveDate) -> String {
    format!("{}day:{}", PREFIX, day.format("%b-%d-%Y").to_string().to_lowercase())
}

/// Canonical systemic tags for one object, in a fixed order.
///
/// `details` is `None` for inline text, which yields an empty extension.
pub fn tags_for(kind: ObjectType, details: Option<&FileDetails>, day: NaiveDate) -> Vec<String> {
    let ext = details.map(|d| d.ext.as_str()).unwrap_or("");
    vec![
        GART_OBJECT.to_string(),
        ext_tag(ext),
        type_tag(kind),
        day_tag(day),
    ]
}
