//! Tag queries.
//!
//! A [`Query`] names the tags an object must carry and the tags it must not
//! carry. Required tags come in two flavours: `all` (every one must be
//! present) and `any` (at least one must be present). Together they form
//! the include set, which is kept disjoint from `exclude`: a tag named on
//! both sides survives only in `exclude`.
//!
//! Evaluation is `AND(all) ∩ OR(any) \ OR(exclude)`, where an empty `all`
//! or `any` imposes no constraint.
//!
//! ```rust
//! use gart_core::query::QueryBuilder;
//! use gart_core::ObjectType;
//!
//! let query = QueryBuilder::new()
//!     .any_of(["red", "blue"])
//!     .exclude(["blue"])
//!     .of_type(ObjectType::File)
//!     .build();
//! assert!(query.any.contains("red"));
//! assert!(!query.any.contains("blue"));
//! assert!(query.all.contains("systemic:type:file"));
//! ```

use std::collections::BTreeSet;

use serde::Serialize;

use crate::oid::ObjectType;
use crate::systemic;

/// How a single list of tags is combined by a select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    /// Objects carrying every tag (AND).
    All,
    /// Objects carrying at least one tag (OR).
    Any,
    /// Objects carrying none of the tags (complement of OR).
    None,
}

/// Immutable tag query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Query {
    pub all: BTreeSet<String>,
    pub any: BTreeSet<String>,
    pub exclude: BTreeSet<String>,
}

impl Query {
    /// Union of `all` and `any`.
    pub fn include(&self) -> BTreeSet<String> {
        self.all.union(&self.any).cloned().collect()
    }

    /// Every tag the query mentions.
    pub fn tags(&self) -> BTreeSet<String> {
        let mut tags = self.include();
        tags.extend(self.exclude.iter().cloned());
        tags
    }

    /// True when no tag is named; such a query selects every object.
    pub fn is_unconstrained(&self) -> bool {
        self.all.is_empty() && self.any.is_empty() && self.exclude.is_empty()
    }
}

/// Mutable builder for [`Query`].
///
/// Tag names are trimmed and lower-cased on entry. Type and extension
/// filters translate to their systemic tag names and join `all` (or
/// `exclude` for the negative forms).
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

fn canonical<I, S>(names: I) -> impl Iterator<Item = String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require every one of `names`.
    pub fn all_of<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.query.all.extend(canonical(names));
        self
    }

    /// Require at least one of `names`.
    pub fn any_of<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.query.any.extend(canonical(names));
        self
    }

    /// Reject objects carrying any of `names`.
    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.query.exclude.extend(canonical(names));
        self
    }

    pub fn of_type(mut self, kind: ObjectType) -> Self {
        self.query.all.insert(systemic::type_tag(kind));
        self
    }

    pub fn not_of_type(mut self, kind: ObjectType) -> Self {
        self.query.exclude.insert(systemic::type_tag(kind));
        self
    }

    pub fn with_ext(mut self, ext: &str) -> Self {
        self.query.all.insert(systemic::ext_tag(ext));
        self
    }

    pub fn without_ext(mut self, ext: &str) -> Self {
        self.query.exclude.insert(systemic::ext_tag(ext));
        self
    }

    /// Freeze the builder. Excluded tags are removed from the include side.
    pub fn build(self) -> Query {
        let mut query = self.query;
        let exclude = &query.exclude;
        query.all.retain(|t| !exclude.contains(t));
        query.any.retain(|t| !exclude.contains(t));
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_canonical() {
        let q = QueryBuilder::new()
            .all_of([" Greet ", "FARSI", ""])
            .build();
        assert_eq!(
            q.all.into_iter().collect::<Vec<_>>(),
            vec!["farsi".to_string(), "greet".to_string()]
        );
    }

    #[test]
    fn test_exclude_wins_overlap() {
        let q = QueryBuilder::new()
            .all_of(["red", "blue"])
            .any_of(["blue", "green"])
            .exclude(["Blue"])
            .build();
        assert!(!q.include().contains("blue"));
        assert!(q.exclude.contains("blue"));
        assert!(q.include().is_disjoint(&q.exclude));
    }

    #[test]
    fn test_type_and_ext_filters() {
        let q = QueryBuilder::new()
            .of_type(ObjectType::Text)
            .without_ext(".md")
            .build();
        assert!(q.all.contains("systemic:type:text"));
        assert!(q.exclude.contains("systemic:ext:md"));
        assert_eq!(q.tags().len(), 2);
    }

    #[test]
    fn test_unconstrained() {
        assert!(QueryBuilder::new().build().is_unconstrained());
        assert!(!QueryBuilder::new().exclude(["x"]).build().is_unconstrained());
    }
}
