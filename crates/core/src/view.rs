//! View projection for the display layer.
//!
//! Pure and recomputed from scratch: filter the registry snapshot by a
//! search term, sort by the chosen criterion, then reconcile the selection
//! with the result.

use std::cmp::Ordering;
use std::str::FromStr;

use icu_collator::options::CollatorOptions;
use icu_collator::{Collator, CollatorBorrowed};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::record::EntityRecord;
use crate::types::DbId;

/// Sort order for the projected view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortCriterion {
    /// High, then medium, then low. Ties keep registry order.
    #[default]
    Risk,
    /// Ascending by name, root-locale collation.
    Name,
    /// Descending by current heart rate, missing values last.
    Heart,
    /// Descending by current temperature, missing values last.
    Temperature,
}

impl FromStr for SortCriterion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "risk" => Ok(Self::Risk),
            "name" => Ok(Self::Name),
            "heart" => Ok(Self::Heart),
            "temperature" => Ok(Self::Temperature),
            other => Err(CoreError::Validation(format!("unknown sort criterion '{other}'"))),
        }
    }
}

/// Case-insensitive substring match on the name. A blank term matches all.
pub fn matches_search(record: &EntityRecord, term: &str) -> bool {
    term.trim().is_empty() || record.name.to_lowercase().contains(&term.to_lowercase())
}

/// Root-locale collator for name sorting, if the collation data loads.
pub fn name_collator() -> Option<CollatorBorrowed<'static>> {
    Collator::try_new(Default::default(), CollatorOptions::default()).ok()
}

/// Name ordering by `collator`, or by lowercased chars without one. Ties
/// fall back to code points so the order is total.
pub fn compare_names(collator: Option<&CollatorBorrowed<'_>>, a: &str, b: &str) -> Ordering {
    let ordering = match collator {
        Some(collator) => collator.compare(a, b),
        None => a
            .chars()
            .flat_map(char::to_lowercase)
            .cmp(b.chars().flat_map(char::to_lowercase)),
    };
    ordering.then_with(|| a.cmp(b))
}

fn descending_missing_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Filter and sort `records`. The sort is stable, so equal keys keep the
/// order they had in the registry.
pub fn project(records: &[EntityRecord], search: &str, sort: SortCriterion) -> Vec<EntityRecord> {
    let mut view: Vec<EntityRecord> = records
        .iter()
        .filter(|r| matches_search(r, search))
        .cloned()
        .collect();

    match sort {
        SortCriterion::Risk => view.sort_by_key(|r| r.risk),
        SortCriterion::Name => {
            let collator = name_collator();
            view.sort_by(|a, b| compare_names(collator.as_ref(), &a.name, &b.name));
        }
        SortCriterion::Heart => view.sort_by(|a, b| {
            descending_missing_last(a.current.heart_rate, b.current.heart_rate)
        }),
        SortCriterion::Temperature => view.sort_by(|a, b| {
            descending_missing_last(a.current.temperature, b.current.temperature)
        }),
    }

    view
}

/// Keep `selected` if it is still in `view`, otherwise pick the first entry
/// (or nothing when the view is empty).
pub fn sync_selection(selected: Option<DbId>, view: &[EntityRecord]) -> Option<DbId> {
    match selected {
        Some(id) if view.iter().any(|r| r.id == id) => Some(id),
        _ => view.first().map(|r| r.id),
    }
}
