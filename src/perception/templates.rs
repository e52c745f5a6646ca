use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::GrayImage;

use crate::errors::{PilotError, PilotResult};

/// Read-only cache of template images keyed by their path relative to the
/// templates root (lowercase, `/`-separated).
///
/// Templates are handed out as `Arc<GrayImage>`: callers share the pixels but
/// cannot mutate them.
#[derive(Debug, Default)]
pub struct TemplateStore {
    templates: HashMap<String, Arc<GrayImage>>,
    root: Option<PathBuf>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `.png` below `root`, recursively.
    pub async fn load_dir(root: impl AsRef<Path>) -> PilotResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            return Err(PilotError::Config(format!(
                "templates directory does not exist: {}",
                root.display()
            )));
        }

        let mut store = Self {
            templates: HashMap::new(),
            root: Some(root.clone()),
        };
        store.load_from_dir(&root, &root).await?;
        tracing::info!(
            path = %root.display(),
            count = store.templates.len(),
            "templates loaded"
        );
        Ok(store)
    }

    async fn load_from_dir(&mut self, root: &Path, dir: &Path) -> PilotResult<()> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                Box::pin(self.load_from_dir(root, &path)).await?;
            } else if path
                .extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case("png"))
            {
                let bytes = tokio::fs::read(&path).await?;
                let image = image::load_from_memory(&bytes)?.to_luma8();
                let rel = path.strip_prefix(root).unwrap_or(&path);
                let key = normalize_key(&rel.to_string_lossy());
                tracing::debug!(key = %key, "template loaded");
                self.templates.insert(key, Arc::new(image));
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, name: &str, image: GrayImage) {
        self.templates.insert(normalize_key(name), Arc::new(image));
    }

    pub fn get(&self, name: &str) -> PilotResult<Arc<GrayImage>> {
        self.templates
            .get(&normalize_key(name))
            .cloned()
            .ok_or_else(|| PilotError::TemplateNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(&normalize_key(name))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }
}

fn normalize_key(name: &str) -> String {
    let key = name.replace('\\', "/").to_lowercase();
    key.trim_start_matches("./").trim_start_matches('/').to_string()
}
