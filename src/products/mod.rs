//! Product expectations, output verification, and geo-reference patching.

pub mod geo_ref;
pub mod table;
pub mod verifier;

pub use geo_ref::{patch_products, CommandGeoRef, GeoRefWriter, NoopGeoRef};
pub use table::{ProductCategory, ProductEntry, ProductTable};
pub use verifier::{sweep_intermediates, verify_products, ProductVerification};
