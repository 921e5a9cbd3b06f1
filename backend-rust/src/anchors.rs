use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

use position_types::{Anchor, Vec3};

/// Read-only view of the anchor registry.
pub trait AnchorDirectory: Send + Sync {
    /// Active anchors only, id → surveyed coordinate.
    fn active_anchors(&self) -> HashMap<String, Vec3>;

    fn anchor(&self, anchor_id: &str) -> Option<Anchor>;

    fn anchors(&self) -> Vec<Anchor>;
}

/// Immutable snapshot of the registry, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticAnchorDirectory {
    anchors: Vec<Anchor>,
}

impl StaticAnchorDirectory {
    pub fn new(anchors: Vec<Anchor>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let anchors = anchors
            .into_iter()
            .filter(|a| {
                let fresh = seen.insert(a.anchor_id.clone());
                if !fresh {
                    warn!("Duplicate anchor id {} in registry snapshot, keeping the first", a.anchor_id);
                }
                fresh
            })
            .collect();
        Self { anchors }
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

impl AnchorDirectory for StaticAnchorDirectory {
    fn active_anchors(&self) -> HashMap<String, Vec3> {
        self.anchors
            .iter()
            .filter(|a| a.active)
            .map(|a| (a.anchor_id.clone(), a.position()))
            .collect()
    }

    fn anchor(&self, anchor_id: &str) -> Option<Anchor> {
        self.anchors.iter().find(|a| a.anchor_id == anchor_id).cloned()
    }

    fn anchors(&self) -> Vec<Anchor> {
        self.anchors.clone()
    }
}

/// Load the anchor registry snapshot. A missing file yields an empty directory;
/// a file that exists but cannot be parsed is a startup error.
pub async fn load_anchor_file(path: &Path) -> Result<StaticAnchorDirectory> {
    if !path.exists() {
        info!("No {} found, starting with an empty anchor directory", path.display());
        return Ok(StaticAnchorDirectory::default());
    }

    let data = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let anchors: Vec<Anchor> = serde_json::from_str(&data)
        .with_context(|| format!("parsing {}", path.display()))?;

    let directory = StaticAnchorDirectory::new(anchors);
    info!(
        "Loaded anchor directory from {} ({} anchors, {} active)",
        path.display(),
        directory.len(),
        directory.active_anchors().len()
    );
    Ok(directory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_anchors_are_hidden_from_solver_view() {
        let dir = StaticAnchorDirectory::new(vec![
            Anchor::new("A1", 0.0, 0.0, 3.0),
            Anchor::new("A2", 50.0, 0.0, 3.0).inactive(),
        ]);
        let active = dir.active_anchors();
        assert_eq!(active.len(), 1);
        assert_eq!(active["A1"], Vec3::new(0.0, 0.0, 3.0));
        assert!(dir.anchor("A2").is_some());
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let dir = StaticAnchorDirectory::new(vec![
            Anchor::new("A1", 0.0, 0.0, 0.0),
            Anchor::new("A1", 9.0, 9.0, 9.0),
        ]);
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.anchor("A1").map(|a| a.x), Some(0.0));
    }

    #[tokio::test]
    async fn missing_file_is_empty_directory() {
        let dir = load_anchor_file(Path::new("/nonexistent/anchors.json")).await.unwrap();
        assert!(dir.is_empty());
    }

    #[tokio::test]
    async fn loads_registry_json() {
        let path = std::env::temp_dir().join(format!("anchors-{}.json", std::process::id()));
        let json = r#"[
            {"anchor_id": "A1", "x": 0.0, "y": 0.0, "z": 3.0, "description": "north wall"},
            {"anchor_id": "A2", "x": 50.0, "y": 0.0, "z": 3.0, "is_active": false}
        ]"#;
        fs::write(&path, json).await.unwrap();
        let dir = load_anchor_file(&path).await.unwrap();
        let _ = fs::remove_file(&path).await;

        assert_eq!(dir.len(), 2);
        assert_eq!(dir.active_anchors().len(), 1);
        assert_eq!(dir.anchor("A1").and_then(|a| a.description), Some("north wall".into()));
    }
}
