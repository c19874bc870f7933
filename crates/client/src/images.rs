//! Local-only images and their upload to the image bucket.
//!
//! A picked image is first registered in [`LocalBlobs`] and referenced by a
//! `blob:` handle that is only meaningful inside this session. Before an item
//! is written, [`ImageUploader::persist`] swaps such a handle for the public
//! address of the uploaded object. A handle never reaches the store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::backend::{BackendError, ObjectUpload, RemoteDataService};

pub const LOCAL_PREFIX: &str = "blob:";

/// Parsed form of an item's image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    None,
    /// Durable address in the object store (or anywhere else on the web).
    Remote(String),
    /// Session-scoped handle into [`LocalBlobs`].
    Local(String),
}

impl ImageRef {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => ImageRef::None,
            Some(s) if s.starts_with(LOCAL_PREFIX) => ImageRef::Local(s.to_string()),
            Some(s) => ImageRef::Remote(s.to_string()),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ImageRef::Local(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Session registry of picked images. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct LocalBlobs {
    inner: Arc<RwLock<HashMap<String, Blob>>>,
}

impl LocalBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `bytes` for this session and return its `blob:` handle.
    pub fn register(&self, bytes: impl Into<Bytes>, content_type: impl Into<String>) -> String {
        let handle = format!("{LOCAL_PREFIX}{}", Uuid::new_v4());
        let blob = Blob {
            bytes: bytes.into(),
            content_type: content_type.into(),
        };
        if let Ok(mut blobs) = self.inner.write() {
            blobs.insert(handle.clone(), blob);
        }
        handle
    }

    pub fn resolve(&self, handle: &str) -> Option<Blob> {
        self.inner.read().ok()?.get(handle).cloned()
    }

    /// Forget a handle. Returns whether it was registered.
    pub fn revoke(&self, handle: &str) -> bool {
        self.inner
            .write()
            .map(|mut blobs| blobs.remove(handle).is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("no local image registered for {0}")]
    UnknownHandle(String),
    #[error("image upload failed: {0}")]
    Backend(#[from] BackendError),
}

/// Uploads local-only images before they are referenced by an item.
#[derive(Clone)]
pub struct ImageUploader {
    backend: Arc<dyn RemoteDataService>,
    blobs: LocalBlobs,
    cache_control: String,
}

impl ImageUploader {
    pub fn new(
        backend: Arc<dyn RemoteDataService>,
        blobs: LocalBlobs,
        cache_control: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            blobs,
            cache_control: cache_control.into(),
        }
    }

    pub fn blobs(&self) -> &LocalBlobs {
        &self.blobs
    }

    /// Return a reference safe to persist.
    ///
    /// Remote references and `None` pass through untouched. A local handle is
    /// uploaded and replaced by the object's public address; the handle is
    /// released once the upload succeeded.
    pub async fn persist(&self, image_url: Option<String>) -> Result<Option<String>, UploadError> {
        let handle = match ImageRef::parse(image_url.as_deref()) {
            ImageRef::Local(handle) => handle,
            ImageRef::None => return Ok(None),
            ImageRef::Remote(url) => return Ok(Some(url)),
        };

        let blob = self
            .blobs
            .resolve(&handle)
            .ok_or_else(|| UploadError::UnknownHandle(handle.clone()))?;
        let path = object_name(&blob.content_type);

        tracing::debug!(%path, size = blob.bytes.len(), "uploading image");
        self.backend
            .upload_object(ObjectUpload {
                path: path.clone(),
                bytes: blob.bytes,
                content_type: blob.content_type,
                cache_control: self.cache_control.clone(),
                upsert: false,
            })
            .await?;
        self.blobs.revoke(&handle);

        Ok(Some(self.backend.public_url(&path)))
    }
}

/// `book_{unix_millis}_{8 hex}.{subtype}`; the subtype of the MIME type is
/// the extension, `bin` when there is none.
pub fn object_name(content_type: &str) -> String {
    let ext = content_type
        .split_once('/')
        .map(|(_, subtype)| subtype.split(';').next().unwrap_or("").trim())
        .filter(|subtype| !subtype.is_empty())
        .unwrap_or("bin");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("book_{}_{}.{}", Utc::now().timestamp_millis(), &suffix[..8], ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, Operation};

    fn uploader() -> (Arc<InMemoryBackend>, ImageUploader) {
        let backend = Arc::new(InMemoryBackend::new());
        let uploader = ImageUploader::new(backend.clone(), LocalBlobs::new(), "3600");
        (backend, uploader)
    }

    #[test]
    fn parses_references() {
        assert_eq!(ImageRef::parse(None), ImageRef::None);
        assert_eq!(ImageRef::parse(Some("  ")), ImageRef::None);
        assert!(ImageRef::parse(Some("blob:abc")).is_local());
        assert_eq!(
            ImageRef::parse(Some("https://cdn.example/a.png")),
            ImageRef::Remote("https://cdn.example/a.png".to_string())
        );
    }

    #[test]
    fn object_name_uses_mime_subtype() {
        let name = object_name("image/png");
        assert!(name.starts_with("book_"));
        assert!(name.ends_with(".png"));
        assert!(object_name("application").ends_with(".bin"));
        assert!(object_name("image/jpeg; q=1").ends_with(".jpeg"));
        assert_ne!(object_name("image/png"), object_name("image/png"));
    }

    #[test]
    fn blobs_register_resolve_revoke() {
        let blobs = LocalBlobs::new();
        let handle = blobs.register(&b"png"[..], "image/png");
        assert!(handle.starts_with(LOCAL_PREFIX));
        assert_eq!(blobs.resolve(&handle).unwrap().content_type, "image/png");
        assert!(blobs.revoke(&handle));
        assert!(blobs.resolve(&handle).is_none());
        assert!(blobs.is_empty());
    }

    #[tokio::test]
    async fn local_handle_is_uploaded_and_rewritten() {
        let (backend, uploader) = uploader();
        let handle = uploader.blobs().register(&b"png-bytes"[..], "image/png");

        let url = uploader.persist(Some(handle.clone())).await.unwrap().unwrap();

        assert!(url.starts_with("memory://storage/book-images/book_"));
        let path = url.rsplit('/').next().unwrap();
        let stored = backend.object(path).unwrap();
        assert_eq!(stored.bytes, Bytes::from_static(b"png-bytes"));
        assert_eq!(stored.cache_control, "3600");
        assert!(uploader.blobs().resolve(&handle).is_none());
    }

    #[tokio::test]
    async fn remote_and_missing_references_pass_through() {
        let (backend, uploader) = uploader();
        let remote = Some("https://cdn.example/a.png".to_string());
        assert_eq!(uploader.persist(remote.clone()).await.unwrap(), remote);
        assert_eq!(uploader.persist(None).await.unwrap(), None);
        assert_eq!(backend.calls(Operation::Upload), 0);
    }

    #[tokio::test]
    async fn unknown_handle_and_backend_failure_are_errors() {
        let (backend, uploader) = uploader();
        let err = uploader.persist(Some("blob:gone".to_string())).await.unwrap_err();
        assert_eq!(err, UploadError::UnknownHandle("blob:gone".to_string()));

        backend.fail_next(Operation::Upload, BackendError::new("bucket not found"));
        let handle = uploader.blobs().register(&b"x"[..], "image/png");
        let err = uploader.persist(Some(handle.clone())).await.unwrap_err();
        assert!(matches!(err, UploadError::Backend(_)));
        assert!(uploader.blobs().resolve(&handle).is_some());
    }
}
