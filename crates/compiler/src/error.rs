use thiserror::Error;

/// Everything that can stop a selector from becoming SQL. None of these
/// are raised after SQL generation has started.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("Failed to parse selector JSON: {0}")]
    Parse(String),

    #[error("Invalid selector at {path}: {message}")]
    Validation { path: String, message: String },

    #[error("Circular selector include: {}", format_chain(.0))]
    CircularInclude(Vec<i64>),

    #[error("Included selector {0} does not exist")]
    MissingInclude(i64),

    #[error("Connection tree depth {depth} exceeds the maximum of {max}")]
    MaxDepthExceeded { depth: usize, max: usize },
}

impl CompileError {
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::Validation {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CompileError {
    fn from(err: serde_json::Error) -> Self {
        CompileError::Parse(err.to_string())
    }
}

fn format_chain(chain: &[i64]) -> String {
    chain
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_message_shows_chain() {
        let err = CompileError::CircularInclude(vec![3, 7, 3]);
        assert_eq!(err.to_string(), "Circular selector include: 3 -> 7 -> 3");
    }
}
