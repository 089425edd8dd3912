use serde::{Deserialize, Serialize};

/// A short code mapped to the URL it redirects to.
///
/// `id` and `created_at` are assigned by storage; a `created_at` of zero asks
/// storage to stamp the insert time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortenedUrl {
    pub id: i64,
    pub short_code: String,
    pub original_url: String,
    pub created_at: i64,
}

impl ShortenedUrl {
    pub fn new(short_code: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            id: 0,
            short_code: short_code.into(),
            original_url: original_url.into(),
            created_at: 0,
        }
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }
}
