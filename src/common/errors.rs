use crate::store::EntityKind;
use std::fmt::Display;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// 保管库操作可能遇到的错误类型
///
/// Every operation either fully succeeds or returns one of these and leaves
/// the vault unchanged.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid {parameter}: '{value}', valid values are [{}]", .valid.join(", "))]
    InvalidParameter {
        parameter: String,
        value: String,
        valid: Vec<String>,
    },

    #[error("{kind} '{name}'{} not found", .version.as_deref().map(|v| format!(" version '{v}'")).unwrap_or_default())]
    NotFound {
        kind: EntityKind,
        name: String,
        version: Option<String>,
    },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: EntityKind, name: String },

    #[error("conflict on {target} in state {state}: {reason}")]
    Conflict {
        target: String,
        state: String,
        reason: String,
    },

    #[error("operation {operation} is not supported for {target}")]
    UnsupportedOperation { operation: String, target: String },

    #[error("Cryptography error: {0}")]
    CryptoFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Serialization error (JSON)")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_parameter<V, I>(parameter: &str, value: V, valid: I) -> Self
    where
        V: Display,
        I: IntoIterator,
        I::Item: Display,
    {
        Error::InvalidParameter {
            parameter: parameter.to_string(),
            value: value.to_string(),
            valid: valid.into_iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn not_found(kind: EntityKind, name: &str) -> Self {
        Error::NotFound {
            kind,
            name: name.to_string(),
            version: None,
        }
    }

    pub fn version_not_found(kind: EntityKind, name: &str, version: &str) -> Self {
        Error::NotFound {
            kind,
            name: name.to_string(),
            version: Some(version.to_string()),
        }
    }

    pub fn already_exists(kind: EntityKind, name: &str) -> Self {
        Error::AlreadyExists {
            kind,
            name: name.to_string(),
        }
    }

    pub fn conflict(target: impl Display, state: impl Display, reason: impl Into<String>) -> Self {
        Error::Conflict {
            target: target.to_string(),
            state: state.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(operation: impl Display, target: impl Display) -> Self {
        Error::UnsupportedOperation {
            operation: operation.to_string(),
            target: target.to_string(),
        }
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Error::CryptoFailure(message.into())
    }
}

// 手动实现一些无法使用 #[from] 的转换
impl From<x509_cert::der::Error> for Error {
    fn from(err: x509_cert::der::Error) -> Self {
        Error::CryptoFailure(format!("DER encoding error: {}", err))
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::invalid_parameter("base64 content", err, ["standard base64"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameter_lists_valid_values() {
        let err = Error::invalid_parameter("key size", 5000, [2048, 3072, 4096]);
        assert_eq!(
            err.to_string(),
            "invalid key size: '5000', valid values are [2048, 3072, 4096]"
        );
    }

    #[test]
    fn test_not_found_messages() {
        let err = Error::not_found(EntityKind::Key, "k1");
        assert_eq!(err.to_string(), "key 'k1' not found");

        let err = Error::version_not_found(EntityKind::Secret, "s1", "abc");
        assert_eq!(err.to_string(), "secret 's1' version 'abc' not found");
    }

    #[test]
    fn test_conflict_carries_state() {
        let err = Error::conflict("certificate 'c1'", "Active", "cannot purge");
        match err {
            Error::Conflict { state, .. } => assert_eq!(state, "Active"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
