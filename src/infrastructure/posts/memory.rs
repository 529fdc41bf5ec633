use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use crate::domain::{
    error::ImportError,
    models::{NewPost, PostId},
    ports::PostRepository,
};
use super::StoredPost;

#[derive(Default)]
pub struct MemoryPostRepository {
    posts: Mutex<Vec<StoredPost>>,
}

impl MemoryPostRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn posts(&self) -> Result<MutexGuard<'_, Vec<StoredPost>>, ImportError> {
        self.posts
            .lock()
            .map_err(|e| ImportError::Storage(format!("post store lock poisoned: {}", e)))
    }

    pub fn snapshot(&self) -> Vec<StoredPost> {
        self.posts
            .lock()
            .map(|posts| posts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PostRepository for MemoryPostRepository {
    async fn find_by_title(&self, post_type: &str, title: &str) -> Result<Option<PostId>, ImportError> {
        Ok(self
            .posts()?
            .iter()
            .find(|p| p.post_type == post_type && p.title == title)
            .map(|p| p.id))
    }

    async fn create_post(&self, post: &NewPost) -> Result<PostId, ImportError> {
        let mut posts = self.posts()?;
        let id = posts.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        debug!("Creating in-memory post {} '{}'", id, post.title);
        posts.push(StoredPost::from_new(id, post));
        Ok(id)
    }

    async fn attach_image(&self, post_id: PostId, image_url: &str) -> Result<(), ImportError> {
        let mut posts = self.posts()?;
        let post = posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| ImportError::Storage(format!("post {} does not exist", post_id)))?;
        post.featured_image = Some(image_url.to_string());
        Ok(())
    }

    async fn template_exists(&self, template_id: u64) -> Result<bool, ImportError> {
        Ok(self.posts()?.iter().any(|p| p.id == template_id))
    }

    async fn count(&self, post_type: &str) -> Result<usize, ImportError> {
        Ok(self.posts()?.iter().filter(|p| p.post_type == post_type).count())
    }
}
