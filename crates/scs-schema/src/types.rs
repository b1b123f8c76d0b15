//! Newtype wrappers for identifiers, providing compile-time type safety.
//!
//! String newtypes serialize as plain strings, numeric ids as plain integers,
//! so persisted records and manifests stay readable by other tooling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use thiserror::Error;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    };
}

id_newtype!(
    /// Entity id of a [`Component`](crate::Component).
    ComponentId
);

id_newtype!(
    /// Entity id of a [`Stack`](crate::Stack).
    StackId
);

id_newtype!(
    /// Entity id of a [`Snapshot`](crate::Snapshot).
    SnapshotId
);

string_newtype!(
    /// Account that owns a component, stack or snapshot.
    Owner
);

string_newtype!(
    /// Identifier the container API assigned to a container.
    ContainerId
);

string_newtype!(
    /// Name of a persistent container storage volume.
    VolumeName
);

string_newtype!(
    /// Location of a stored file: `private://…`, `public://…` or an absolute path.
    StorageUri
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("machine name must be 1-63 characters, got {0}")]
    Length(usize),
    #[error("machine name '{0}' must match [a-z0-9-]")]
    Charset(String),
    #[error("machine name '{0}' must start with a letter and must not end with '-'")]
    Edges(String),
}

/// DNS-safe, globally unique name of a provisioned resource.
///
/// The same name is used as the database name, repository id, container
/// name and volume prefix, so it has to satisfy the strictest of those
/// (a DNS label).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MachineName(String);

impl MachineName {
    pub fn parse(s: &str) -> Result<Self, NameError> {
        if s.is_empty() || s.len() > 63 {
            return Err(NameError::Length(s.len()));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(NameError::Charset(s.to_owned()));
        }
        if !s.as_bytes()[0].is_ascii_lowercase() || s.ends_with('-') {
            return Err(NameError::Edges(s.to_owned()));
        }
        Ok(Self(s.to_owned()))
    }

    /// Derive a member name such as `demo-sql` from a stack name, truncating
    /// the base so the result stays a valid DNS label.
    pub fn with_suffix(&self, suffix: &str) -> Result<Self, NameError> {
        let room = 63usize.saturating_sub(suffix.len() + 1);
        let base = self.0[..room.min(self.0.len())].trim_end_matches('-');
        Self::parse(&format!("{base}-{suffix}"))
    }

    /// Underscore form for backends that reject `-` in identifiers (SQL).
    pub fn to_identifier(&self) -> String {
        self.0.replace('-', "_")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for MachineName {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MachineName {
    type Error = NameError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<MachineName> for String {
    fn from(name: MachineName) -> Self {
        name.0
    }
}

impl FromStr for MachineName {
    type Err = NameError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_id_serializes_as_integer() {
        let id = ComponentId::new(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: ComponentId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn component_id_from_str() {
        assert_eq!("7".parse::<ComponentId>().unwrap(), ComponentId::new(7));
        assert!("seven".parse::<ComponentId>().is_err());
    }

    #[test]
    fn owner_display_and_deref() {
        let owner = Owner::new("alice");
        assert_eq!(owner.to_string(), "alice");
        assert_eq!(&*owner, "alice");
    }

    #[test]
    fn machine_name_accepts_dns_labels() {
        assert!(MachineName::parse("demo").is_ok());
        assert!(MachineName::parse("demo-01-sql").is_ok());
    }

    #[test]
    fn machine_name_rejects_invalid() {
        assert_eq!(MachineName::parse(""), Err(NameError::Length(0)));
        assert!(matches!(
            MachineName::parse("Demo"),
            Err(NameError::Charset(_))
        ));
        assert!(matches!(
            MachineName::parse("under_score"),
            Err(NameError::Charset(_))
        ));
        assert!(matches!(MachineName::parse("1abc"), Err(NameError::Edges(_))));
        assert!(matches!(MachineName::parse("abc-"), Err(NameError::Edges(_))));
        assert!(MachineName::parse(&"a".repeat(64)).is_err());
    }

    #[test]
    fn machine_name_suffix_stays_within_limit() {
        let long = MachineName::parse(&"a".repeat(63)).unwrap();
        let derived = long.with_suffix("triplestore").unwrap();
        assert_eq!(derived.len(), 63);
        assert!(derived.ends_with("-triplestore"));
    }

    #[test]
    fn machine_name_identifier_form() {
        let name = MachineName::parse("my-stack-sql").unwrap();
        assert_eq!(name.to_identifier(), "my_stack_sql");
    }

    #[test]
    fn machine_name_deserialize_validates() {
        let ok: MachineName = serde_json::from_str("\"good-name\"").unwrap();
        assert_eq!(ok.as_str(), "good-name");
        assert!(serde_json::from_str::<MachineName>("\"Bad Name\"").is_err());
    }
}
