use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// URL reference attached to a request or response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
}

impl Link {
    pub fn new(url: impl Into<String>, title: Option<String>) -> Self {
        Self { id: Uuid::new_v4().to_string(), url: url.into(), title }
    }
}

/// File metadata only; the bytes live in external storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub id: String,
    pub name: String,
    pub url: String,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
}

impl FileAttachment {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            url: url.into(),
            content_type: None,
            size_bytes: None,
        }
    }
}
