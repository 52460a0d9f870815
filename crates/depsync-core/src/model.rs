// ── Domain model ──
//
// The manifest value types are the wire types; this module adds the slice
// vocabulary and the derived accessors the cache exposes.

use serde::Serialize;

pub use depsync_api::{CondaDependencies, DepsSnapshot, UvDependencies};

/// One independently cached, independently broadcast dependency manifest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    strum::Display,
    strum::IntoStaticStr,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SliceKind {
    Uv,
    Conda,
}

/// Behaviour shared by every manifest family.
pub trait Manifest: Clone + Send + Sync + 'static {
    fn dependencies(&self) -> &[String];

    /// At least one dependency is declared.
    fn has_entries(&self) -> bool {
        !self.dependencies().is_empty()
    }
}

impl Manifest for UvDependencies {
    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

impl Manifest for CondaDependencies {
    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn slice_kind_names() {
        assert_eq!(SliceKind::Uv.to_string(), "uv");
        assert_eq!(SliceKind::from_str("conda").ok(), Some(SliceKind::Conda));
        assert!(SliceKind::from_str("pip").is_err());
    }

    #[test]
    fn has_entries_tracks_dependency_list() {
        let mut uv = UvDependencies::default();
        assert!(!uv.has_entries());

        uv.dependencies.push("numpy".into());
        assert!(uv.has_entries());

        let conda = CondaDependencies {
            dependencies: Vec::new(),
            channels: vec!["conda-forge".into()],
            python: None,
        };
        assert!(!conda.has_entries());
    }
}
