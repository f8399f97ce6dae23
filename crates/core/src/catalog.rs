use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{QcError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subcategory {
    pub subcategory_id: i64,
    pub name: String,
    pub point_value: f64,
    pub is_fatal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub category_id: i64,
    pub name: String,
    pub total_points: f64,
    pub subcategories: Vec<Subcategory>,
}

/// Legacy fatal-error detection: a subcategory worth the full category
/// weight whose display name contains "fatal error". Only used for catalog
/// rows that predate the explicit `is_fatal` flag; the name sniff couples
/// behavior to a human-readable label and is kept as a compatibility shim.
pub fn legacy_fatal(name: &str, point_value: f64) -> bool {
    point_value == 100.0 && name.to_lowercase().contains("fatal error")
}

/// Supplies the two-level weighted scoring schema for a project type.
/// Implementations must return a stable snapshot: the catalog is fetched
/// once per scoring call and never re-read mid-calculation.
pub trait CatalogSource {
    fn categories_for(&self, project_type_id: i64) -> Result<Vec<Category>>;
}

/// In-memory catalog, used by tests and file-backed configurations.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    by_project_type: FxHashMap<i64, Vec<Category>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(project_type_id: i64, categories: Vec<Category>) -> Self {
        let mut catalog = Self::new();
        catalog.insert(project_type_id, categories);
        catalog
    }

    pub fn insert(&mut self, project_type_id: i64, categories: Vec<Category>) {
        self.by_project_type.insert(project_type_id, categories);
    }
}

impl CatalogSource for StaticCatalog {
    fn categories_for(&self, project_type_id: i64) -> Result<Vec<Category>> {
        self.by_project_type
            .get(&project_type_id)
            .cloned()
            .ok_or(QcError::UnknownProjectType(project_type_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_fatal_requires_both_the_weight_and_the_name() {
        assert!(legacy_fatal("Fatal Error - Compliance", 100.0));
        assert!(legacy_fatal("FATAL ERROR", 100.0));
        assert!(!legacy_fatal("Fatal Error - Compliance", 50.0));
        assert!(!legacy_fatal("Severe mistake", 100.0));
    }

    #[test]
    fn static_catalog_rejects_unknown_project_types() {
        let catalog = StaticCatalog::single(1, Vec::new());
        assert!(catalog.categories_for(1).is_ok());
        let err = catalog.categories_for(2).unwrap_err();
        assert!(matches!(err, QcError::UnknownProjectType(2)));
    }
}
