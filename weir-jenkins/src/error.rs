//! Jenkins client errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to Jenkins failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A job, build, workflow node or credential that does not exist
    ///
    /// Existence checks branch on this instead of failing.
    #[error("{0} not found on Jenkins")]
    NotFound(String),

    /// 401 or 403, a bad API token or a missing CSRF crumb
    #[error("Jenkins refused {path} (status {status})")]
    Forbidden { path: String, status: u16 },

    #[error("Jenkins answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unreadable Jenkins response: {0}")]
    Decode(String),

    #[error("cannot encode credential: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ClientError {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Status { status: 404, .. })
    }
}
