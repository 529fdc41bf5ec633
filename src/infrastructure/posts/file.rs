use async_trait::async_trait;
use reqwest::Client;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, error};
use crate::domain::{
    error::ImportError,
    models::{NewPost, PostId},
    ports::PostRepository,
};
use super::StoredPost;

/// Posts kept in a single JSON document; downloaded images land in `media/`.
pub struct FilePostRepository {
    path: PathBuf,
    media_dir: PathBuf,
    client: Client,
    posts: Mutex<Vec<StoredPost>>,
}

impl FilePostRepository {
    pub async fn open(dir: impl AsRef<Path>, client: Client) -> Result<Self, ImportError> {
        let dir = dir.as_ref();
        let path = dir.join("posts.json");
        let media_dir = dir.join("media");
        tokio::fs::create_dir_all(&media_dir)
            .await
            .map_err(|e| ImportError::Storage(format!("{}: {}", media_dir.display(), e)))?;

        let posts: Vec<StoredPost> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                error!("Failed to load posts from {}: {}", path.display(), e);
                return Err(ImportError::Storage(format!("{}: {}", path.display(), e)));
            }
        };
        debug!("Loaded {} posts from {}", posts.len(), path.display());

        Ok(Self {
            path,
            media_dir,
            client,
            posts: Mutex::new(posts),
        })
    }

    async fn persist(&self, posts: &[StoredPost]) -> Result<(), ImportError> {
        let temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp, serde_json::to_vec_pretty(posts)?)
            .await
            .map_err(|e| ImportError::Storage(format!("{}: {}", temp.display(), e)))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| ImportError::Storage(format!("{}: {}", self.path.display(), e)))
    }

    async fn download_image(&self, post_id: PostId, image_url: &str) -> Result<PathBuf, ImportError> {
        let response = self
            .client
            .get(image_url)
            .send()
            .await
            .map_err(|e| ImportError::Storage(format!("image download failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(ImportError::Storage(format!(
                "image download returned HTTP {} for {}",
                response.status().as_u16(),
                image_url
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImportError::Storage(format!("image download failed: {}", e)))?;

        let target = self.media_dir.join(format!("{}-{}", post_id, image_file_name(image_url)));
        tokio::fs::write(&target, &bytes).await?;
        info!("Saved image for post {} to {} ({} bytes)", post_id, target.display(), bytes.len());
        Ok(target)
    }
}

fn image_file_name(url: &str) -> String {
    let last = url
        .split(|c| c == '?' || c == '#')
        .next()
        .and_then(|u| u.rsplit('/').next())
        .unwrap_or("");
    let name: String = last
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(*c, '.' | '-' | '_'))
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        "image".to_string()
    } else {
        name
    }
}

#[async_trait]
impl PostRepository for FilePostRepository {
    async fn find_by_title(&self, post_type: &str, title: &str) -> Result<Option<PostId>, ImportError> {
        let posts = self.posts.lock().await;
        Ok(posts
            .iter()
            .find(|p| p.post_type == post_type && p.title == title)
            .map(|p| p.id))
    }

    async fn create_post(&self, post: &NewPost) -> Result<PostId, ImportError> {
        let mut posts = self.posts.lock().await;
        let id = posts.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        posts.push(StoredPost::from_new(id, post));
        if let Err(e) = self.persist(&posts).await {
            posts.pop();
            return Err(e);
        }
        debug!("Created post {} '{}'", id, post.title);
        Ok(id)
    }

    async fn attach_image(&self, post_id: PostId, image_url: &str) -> Result<(), ImportError> {
        if !self.posts.lock().await.iter().any(|p| p.id == post_id) {
            return Err(ImportError::Storage(format!("post {} does not exist", post_id)));
        }

        let saved = self.download_image(post_id, image_url).await?;

        let mut posts = self.posts.lock().await;
        if let Some(post) = posts.iter_mut().find(|p| p.id == post_id) {
            post.featured_image = Some(saved.display().to_string());
        }
        self.persist(&posts).await
    }

    async fn template_exists(&self, template_id: u64) -> Result<bool, ImportError> {
        Ok(self.posts.lock().await.iter().any(|p| p.id == template_id))
    }

    async fn count(&self, post_type: &str) -> Result<usize, ImportError> {
        Ok(self
            .posts
            .lock()
            .await
            .iter()
            .filter(|p| p.post_type == post_type)
            .count())
    }
}
