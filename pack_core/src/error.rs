use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum PackError {
    Environment(String),
    InvalidData {
        path: PathBuf,
        line: usize,
        message: String,
    },
    MissingAsset(String),
    Io(std::io::Error),
    Archive(zip::result::ZipError),
    Canceled,
    Internal(String),
}

impl PackError {
    pub fn environment(message: impl Into<String>) -> Self {
        PackError::Environment(message.into())
    }

    pub fn invalid_data(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        PackError::InvalidData {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn missing_asset(message: impl Into<String>) -> Self {
        PackError::MissingAsset(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        PackError::Internal(message.into())
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, PackError::Canceled)
    }
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackError::Environment(message) => write!(f, "environment error: {}", message),
            PackError::InvalidData {
                path,
                line,
                message,
            } => write!(f, "{}:{}: {}", path.display(), line, message),
            PackError::MissingAsset(message) => write!(f, "missing asset: {}", message),
            PackError::Io(err) => write!(f, "io error: {}", err),
            PackError::Archive(err) => write!(f, "archive error: {}", err),
            PackError::Canceled => write!(f, "operation canceled"),
            PackError::Internal(message) => write!(
                f,
                "internal error (please file a bug): {}",
                message
            ),
        }
    }
}

impl std::error::Error for PackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PackError::Io(err) => Some(err),
            PackError::Archive(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PackError {
    fn from(err: std::io::Error) -> Self {
        PackError::Io(err)
    }
}

impl From<zip::result::ZipError> for PackError {
    fn from(err: zip::result::ZipError) -> Self {
        PackError::Archive(err)
    }
}
