use crate::ScsError;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Outcome of every orchestration operation.
///
/// A failure never carries `data`; whatever was achieved before the failure
/// travels in `partial`, so callers can tell "never attempted" (absent) from
/// "attempted and failed" (present, failed).
#[derive(Debug, Clone, PartialEq)]
pub enum ScsResult<T, P = T> {
    Success {
        data: T,
        message: String,
    },
    Failure {
        error: ScsError,
        message: String,
        partial: Option<P>,
    },
}

impl<T, P> ScsResult<T, P> {
    pub fn success(data: T, message: impl Into<String>) -> Self {
        ScsResult::Success {
            data,
            message: message.into(),
        }
    }

    /// Failure whose message is the error's own description.
    pub fn failure(error: ScsError) -> Self {
        let message = error.to_string();
        ScsResult::Failure {
            error,
            message,
            partial: None,
        }
    }

    /// Replace the message of either variant.
    #[must_use]
    pub fn with_message(self, message: impl Into<String>) -> Self {
        match self {
            ScsResult::Success { data, .. } => ScsResult::Success {
                data,
                message: message.into(),
            },
            ScsResult::Failure { error, partial, .. } => ScsResult::Failure {
                error,
                message: message.into(),
                partial,
            },
        }
    }

    /// Attach partial progress to a failure. No effect on success.
    #[must_use]
    pub fn with_partial(self, partial: P) -> Self {
        match self {
            ScsResult::Failure { error, message, .. } => ScsResult::Failure {
                error,
                message,
                partial: Some(partial),
            },
            success => success,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ScsResult::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            ScsResult::Success { data, .. } => Some(data),
            ScsResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ScsError> {
        match self {
            ScsResult::Success { .. } => None,
            ScsResult::Failure { error, .. } => Some(error),
        }
    }

    pub fn partial(&self) -> Option<&P> {
        match self {
            ScsResult::Success { .. } => None,
            ScsResult::Failure { partial, .. } => partial.as_ref(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ScsResult::Success { message, .. } | ScsResult::Failure { message, .. } => message,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            ScsResult::Success { data, .. } => Some(data),
            ScsResult::Failure { .. } => None,
        }
    }

    /// Drop the message and partial progress.
    pub fn into_result(self) -> Result<T, ScsError> {
        match self {
            ScsResult::Success { data, .. } => Ok(data),
            ScsResult::Failure { error, .. } => Err(error),
        }
    }
}

impl<T, P> From<Result<T, ScsError>> for ScsResult<T, P> {
    fn from(r: Result<T, ScsError>) -> Self {
        match r {
            Ok(data) => ScsResult::success(data, ""),
            Err(e) => ScsResult::failure(e),
        }
    }
}

impl<T: Serialize, P: Serialize> Serialize for ScsResult<T, P> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ScsResult", 6)?;
        s.serialize_field("success", &self.is_success())?;
        s.serialize_field("data", &self.data())?;
        s.serialize_field("partial", &self.partial())?;
        s.serialize_field("error", &self.error().map(ToString::to_string))?;
        s.serialize_field("code", &self.error().map(ScsError::code))?;
        s.serialize_field("message", self.message())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_serializes_without_error() {
        let r: ScsResult<u32> = ScsResult::success(7, "done");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["data"], 7);
        assert!(v["error"].is_null());
        assert!(v["code"].is_null());
        assert_eq!(v["message"], "done");
    }

    #[test]
    fn failure_has_no_data_but_keeps_partial() {
        let r: ScsResult<u32, Vec<u32>> =
            ScsResult::failure(ScsError::FileNotFound("/x".to_owned())).with_partial(vec![1, 2]);
        assert!(r.is_failure());
        assert_eq!(r.data(), None);
        assert_eq!(r.partial(), Some(&vec![1, 2]));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["success"], false);
        assert!(v["data"].is_null());
        assert_eq!(v["partial"], serde_json::json!([1, 2]));
        assert_eq!(v["code"], "file_not_found");
        assert_eq!(v["error"], "file not found: /x");
    }

    #[test]
    fn with_partial_ignored_on_success() {
        let r: ScsResult<u32, u32> = ScsResult::success(1, "ok").with_partial(9);
        assert_eq!(r.partial(), None);
        assert_eq!(r.into_result(), Ok(1));
    }

    #[test]
    fn with_message_overrides() {
        let r: ScsResult<()> =
            ScsResult::failure(ScsError::Unsupported("sql restore".to_owned())).with_message("nope");
        assert_eq!(r.message(), "nope");
        assert_eq!(r.error().map(ScsError::code), Some("unsupported"));
    }
}
