#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("malformed playlist: {reason}")]
    MalformedPlaylist { reason: String },

    #[error("master playlist has no selectable variants")]
    NoVariants,

    #[error("variant `{url}` resolved to another master playlist; only one level of nesting is supported")]
    AmbiguousManifest { url: String },

    #[error("segment unavailable (last status: {status:?}) for {url}")]
    SegmentUnavailable { status: Option<u16>, url: String },

    #[error("only {succeeded}/{attempted} segments retrieved; below the success threshold")]
    InsufficientSegments { succeeded: usize, attempted: usize },

    #[error("stream is encrypted and no decryption-capable tool succeeded")]
    DecryptionUnavailable,

    #[error("required tool `{tool}` is not available")]
    ToolUnavailable { tool: &'static str },

    #[error("tool `{tool}` failed: {reason}")]
    ToolFailed { tool: &'static str, reason: String },

    #[error("no segment files found in `{dir}`")]
    NoSegments { dir: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed_playlist(reason: impl Into<String>) -> Self {
        Self::MalformedPlaylist {
            reason: reason.into(),
        }
    }

    pub fn segment_unavailable(status: Option<u16>, url: impl Into<String>) -> Self {
        Self::SegmentUnavailable {
            status,
            url: url.into(),
        }
    }

    pub fn tool_failed(tool: &'static str, reason: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool,
            reason: reason.into(),
        }
    }

    /// The HTTP status carried by the error, when one was observed.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::SegmentUnavailable { status, .. } => *status,
            Self::Network { source } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
