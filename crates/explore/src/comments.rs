use async_trait::async_trait;
use factorlab_core::Result;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// Where exploration text comes from. `Ok(None)` means the comment does not exist.
#[async_trait]
pub trait CommentSource: Send + Sync {
    async fn comment_content(&self, comment_id: &str) -> Result<Option<String>>;
}

/// In-memory comments, optionally seeded from a `{ "<id>": "<text>" }` JSON file.
#[derive(Default)]
pub struct InlineComments {
    comments: RwLock<HashMap<String, String>>,
}

impl InlineComments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let comments: HashMap<String, String> = serde_json::from_str(&content)?;
        Ok(Self {
            comments: RwLock::new(comments),
        })
    }

    pub async fn insert(&self, comment_id: impl Into<String>, content: impl Into<String>) {
        self.comments.write().await.insert(comment_id.into(), content.into());
    }
}

#[async_trait]
impl CommentSource for InlineComments {
    async fn comment_content(&self, comment_id: &str) -> Result<Option<String>> {
        Ok(self.comments.read().await.get(comment_id).cloned())
    }
}
