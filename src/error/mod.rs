use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

pub mod codes;

pub use codes::ErrorCode;

/// Run-level error type.
///
/// Only fatal conditions live here. Per-unit problems are captured as
/// [`crate::aggregation::FailureRecord`]s and never abort the run.
#[derive(Error, Debug)]
pub enum QapError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        key: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Output error: {message}")]
    Sink {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Run incomplete: {message}")]
    Incomplete {
        code: u16,
        message: String,
        missing: Vec<String>,
    },

    #[error("[E{code:04}] Run cancelled: {message}")]
    Cancelled { code: u16, message: String },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl QapError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            code: ErrorCode::CONFIG_GENERIC,
            message: message.into(),
            key: None,
            source: None,
        }
    }

    /// Create a configuration error with specific code and offending key
    pub fn config_with_code(code: u16, message: impl Into<String>, key: Option<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            key,
            source: None,
        }
    }

    /// Create an output error with default code
    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            code: ErrorCode::SINK_GENERIC,
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Create an output error with specific code and path
    pub fn sink_with_code(code: u16, message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::Sink {
            code,
            message: message.into(),
            path,
            source: None,
        }
    }

    /// Wrap an I/O failure that happened while writing `path`
    pub fn sink_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        use std::io::ErrorKind;

        let (code, message) = match err.kind() {
            ErrorKind::PermissionDenied => (ErrorCode::SINK_PERMISSION_DENIED, "Permission denied"),
            ErrorKind::StorageFull => (ErrorCode::SINK_DISK_FULL, "No space left on device"),
            _ => (ErrorCode::SINK_IO_ERROR, "Write failed"),
        };
        Self::sink_with_code(code, message, Some(path.into())).with_source(err)
    }

    pub fn incomplete(missing: Vec<String>) -> Self {
        Self::Incomplete {
            code: ErrorCode::RUN_INCOMPLETE,
            message: format!("{} unit(s) have not reported", missing.len()),
            missing,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            code: ErrorCode::RUN_CANCELLED,
            message: message.into(),
        }
    }

    /// Create a generic other error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Sink { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
            Self::Incomplete { .. } | Self::Cancelled { .. } => {}
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Config { message, .. }
            | Self::Sink { message, .. }
            | Self::Incomplete { message, .. }
            | Self::Cancelled { message, .. }
            | Self::Other { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
        }
        self
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Sink { .. } => 4,
            Self::Incomplete { .. } => 5,
            Self::Cancelled { .. } => 130,
            Self::Other { .. } => 1,
        }
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Sink { code, .. }
            | Self::Incomplete { code, .. }
            | Self::Cancelled { code, .. }
            | Self::Other { code, .. } => *code,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, key, .. } => match key {
                Some(k) => format!("Configuration problem with '{}': {}", k, message),
                None => format!("Configuration problem: {}", message),
            },
            Self::Sink { message, path, .. } => match path {
                Some(p) => format!("Could not write output {}: {}", p.display(), message),
                None => format!("Output error: {}", message),
            },
            Self::Incomplete { message, missing, .. } => {
                let preview: Vec<&str> = missing.iter().take(5).map(String::as_str).collect();
                format!("{} (missing: {})", message, preview.join(", "))
            }
            Self::Cancelled { message, .. } => format!("Run cancelled: {}", message),
            Self::Other { message, .. } => message.clone(),
        }
    }

    /// Get a developer-friendly error message with full chain
    pub fn developer_message(&self) -> String {
        let mut out = format!("{}", self);
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(&format!("\n  caused by: {}", cause));
            source = cause.source();
        }
        out
    }

    /// Whether this error was raised before any unit could run
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

/// Type alias for Results using QapError
pub type Result<T> = std::result::Result<T, QapError>;

impl From<serde_yaml::Error> for QapError {
    fn from(err: serde_yaml::Error) -> Self {
        QapError::config_with_code(ErrorCode::CONFIG_INVALID_YAML, "Invalid YAML syntax", None)
            .with_source(err)
    }
}
