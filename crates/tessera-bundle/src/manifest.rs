// manifest.rs — Bundle manifest: revision, declared roots, free-form metadata.
//
// Roots are written in slash form without a leading slash (`"kafka"`,
// `"acme/users"`). A missing `roots` list means the bundle owns the whole
// tree, which is expressed as the single empty root `""`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tessera_store::Path;

use crate::error::BundleError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Manifest {
    /// Declared roots, or `[""]` when none are declared.
    pub fn effective_roots(&self) -> Vec<String> {
        match &self.roots {
            Some(roots) => roots.clone(),
            None => vec![String::new()],
        }
    }

    /// Effective roots parsed into paths.
    pub fn root_paths(&self, bundle: &str) -> Result<Vec<Path>, BundleError> {
        self.effective_roots()
            .iter()
            .map(|root| {
                Path::parse(root).map_err(|e| BundleError::InvalidRoot {
                    bundle: bundle.to_string(),
                    root: root.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    /// Reject roots of this manifest that overlap each other.
    pub fn validate(&self, bundle: &str) -> Result<(), BundleError> {
        let roots = self.root_paths(bundle)?;
        for (i, a) in roots.iter().enumerate() {
            for b in &roots[i + 1..] {
                if a.overlaps(b) {
                    return Err(BundleError::RootOverlap {
                        first: bundle.to_string(),
                        first_root: a.to_string(),
                        second: bundle.to_string(),
                        second_root: b.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
