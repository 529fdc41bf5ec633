pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::domain::models::{NewPost, PostId};

pub use file::FilePostRepository;
pub use memory::MemoryPostRepository;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPost {
    pub id: PostId,
    pub post_type: String,
    pub status: String,
    pub title: String,
    pub content: String,
    pub template_id: Option<u64>,
    pub meta: BTreeMap<String, String>,
    pub featured_image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredPost {
    pub fn from_new(id: PostId, post: &NewPost) -> Self {
        Self {
            id,
            post_type: post.post_type.clone(),
            status: post.status.clone(),
            title: post.title.clone(),
            content: post.content.clone(),
            template_id: post.template_id,
            meta: post.meta.clone(),
            featured_image: None,
            created_at: Utc::now(),
        }
    }
}
