//! Granule metadata catalog and contiguity grouping.

pub mod grouping;
pub mod record;

pub use grouping::{contiguous_groups, groups_contain, ContiguousGroup};
pub use record::{ensure_unique_granules, Catalog, CatalogQuery, FsCatalog, GranuleIndex, GranuleRecord};
