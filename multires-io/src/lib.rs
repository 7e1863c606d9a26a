//! Persistence for multires forests
//!
//! Three surfaces over one data model: the `.mrf` binary format for
//! shipping built hierarchies, a magic-prefixed in-memory blob for
//! hand-off between engine stages, and the `.vif` text format for tools
//! and tests. [`read_forest`]/[`write_forest`] pick the format from the
//! file extension.

pub mod binary;
pub mod error;
pub mod memory;
pub mod vif;

pub use binary::{read_mrf, write_mrf, FORMAT_MAJOR, FORMAT_MINOR};
pub use error::*;
pub use memory::{peek_root_bounding_box, read_forest_from_memory, write_forest_to_memory, MAGIC};
pub use vif::{read_vif, read_vif_file, write_vif, write_vif_file, VIF_MAJOR, VIF_MINOR};

use std::path::Path;

use multires_core::Forest;

/// Auto-detect format by extension and read a forest.
pub fn read_forest<P: AsRef<Path>>(path: P) -> Result<Forest> {
    let path = path.as_ref();
    match path.extension().and_then(|s| s.to_str()) {
        Some("vif") => vif::read_vif_file(path),
        Some("mrf") => binary::read_mrf(path),
        other => Err(IoError::UnsupportedFormat(format!(
            "unknown forest extension {:?}",
            other
        ))),
    }
}

/// Auto-detect format by extension and write a forest.
pub fn write_forest<P: AsRef<Path>>(forest: &Forest, path: P) -> Result<()> {
    let path = path.as_ref();
    match path.extension().and_then(|s| s.to_str()) {
        Some("vif") => vif::write_vif_file(forest, path),
        Some("mrf") => binary::write_mrf(forest, path),
        other => Err(IoError::UnsupportedFormat(format!(
            "unknown forest extension {:?}",
            other
        ))),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use test_fixtures::sample_forest;

    #[test]
    fn test_extension_dispatch() {
        let forest = sample_forest();
        let dir = tempfile::tempdir().unwrap();

        let vif_path = dir.path().join("f.vif");
        write_forest(&forest, &vif_path).unwrap();
        let from_text = read_forest(&vif_path).unwrap();
        assert_eq!(from_text.node_count(), forest.node_count());

        let mrf_path = dir.path().join("f.mrf");
        write_forest(&forest, &mrf_path).unwrap();
        let from_binary = read_forest(&mrf_path).unwrap();
        assert_eq!(from_binary.node_count(), forest.node_count());
        assert_eq!(from_binary.tri_count(), from_text.tri_count());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let forest = sample_forest();
        assert!(matches!(
            write_forest(&forest, "forest.obj"),
            Err(IoError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            read_forest("forest.obj"),
            Err(IoError::UnsupportedFormat(_))
        ));
    }
}
