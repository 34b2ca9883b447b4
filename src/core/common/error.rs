use crate::core::types::NodeId;
use std::fmt;

#[derive(Debug)]
pub enum OxivecError {
    Io(std::io::Error),
    Serialization(String),
    InvalidConfiguration(String),
    /// `expected == 0` means no dimensionality was established yet and the
    /// offending vector was empty.
    InvalidVector { expected: usize, actual: usize },
    InvalidInput { message: String },
    Store(String),
    Lock(String),
    /// Children of `node` have no 64-bit id, or wrapped ids of distinct
    /// nodes below it collided.
    NodeIdOverflow { node: NodeId },
}

impl fmt::Display for OxivecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO Error: {e}"),
            Self::Serialization(s) => write!(f, "Serialization Error: {s}"),
            Self::InvalidConfiguration(s) => write!(f, "Invalid configuration: {s}"),
            Self::InvalidVector { expected: 0, actual } => {
                write!(f, "Invalid vector: expected a non-empty vector, got {actual} dimensions")
            }
            Self::InvalidVector { expected, actual } => {
                write!(f, "Invalid vector: expected {expected} dimensions, got {actual}")
            }
            Self::InvalidInput { message } => write!(f, "Invalid input: {message}"),
            Self::Store(s) => write!(f, "Store Error: {s}"),
            Self::Lock(s) => write!(f, "Lock Error: {s}"),
            Self::NodeIdOverflow { node } => {
                write!(f, "Node id overflow: children of node {node} do not fit in 64 bits")
            }
        }
    }
}

impl std::error::Error for OxivecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OxivecError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for OxivecError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for OxivecError {
    fn from(err: toml::de::Error) -> Self {
        Self::InvalidConfiguration(err.to_string())
    }
}

impl OxivecError {
    /// Dimensionality check shared by every vector-accepting entry point.
    pub fn check_dimension(expected: usize, actual: usize) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::InvalidVector { expected, actual })
        }
    }
}
