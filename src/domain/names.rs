//! Names and Numbers
//!
//! Validated value objects for every natural key used by the object graph.
//! Names compare case-insensitively: the upper-case form is the persisted key,
//! the display form keeps the spelling used at creation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Minimum length of any checked name
pub const NAME_MIN_LEN: usize = 2;

/// Maximum length of any checked name
pub const NAME_MAX_LEN: usize = 48;

/// Validate the common name syntax: a letter, followed by letters, digits,
/// `_` or `-`
fn check_name(kind: &'static str, value: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidName {
        kind,
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let len = value.chars().count();
    if len < NAME_MIN_LEN {
        return Err(invalid("name is too short"));
    }
    if len > NAME_MAX_LEN {
        return Err(invalid("name is too long"));
    }

    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return Err(invalid("name must start with a letter")),
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-')) {
        return Err(invalid(&format!("invalid character '{}'", bad)));
    }
    Ok(())
}

// =============================================================================
// Checked Names
// =============================================================================

macro_rules! checked_name {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(into = "String", try_from = "String")]
        pub struct $name {
            display: String,
            key: String,
        }

        impl $name {
            /// Validate and construct
            pub fn new(value: &str) -> Result<Self> {
                check_name($kind, value)?;
                Ok(Self {
                    display: value.to_string(),
                    key: value.to_ascii_uppercase(),
                })
            }

            /// Construct from the persisted key and display names
            pub fn with_display(key: &str, display: &str) -> Result<Self> {
                let name = Self::new(display)?;
                if name.key != key.to_ascii_uppercase() {
                    return Err(Error::InvalidName {
                        kind: $kind,
                        value: display.to_string(),
                        reason: format!("display name does not match key '{}'", key),
                    });
                }
                Ok(name)
            }

            /// Display spelling
            pub fn display(&self) -> &str {
                &self.display
            }

            /// Upper-case key, as persisted in primary key columns
            pub fn key(&self) -> &str {
                &self.key
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.key == other.key
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.key.hash(state);
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                self.key.cmp(&other.key)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.display)
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(value: String) -> Result<Self> {
                Self::new(&value)
            }
        }

        impl From<$name> for String {
            fn from(name: $name) -> String {
                name.display
            }
        }
    };
}

checked_name!(
    /// Name of a cluster node
    NodeName,
    "node name"
);
checked_name!(
    /// Name of a resource definition
    ResourceName,
    "resource name"
);
checked_name!(
    /// Name of a snapshot of a resource definition
    SnapshotName,
    "snapshot name"
);
checked_name!(
    /// Name of a storage pool, unique per node
    StorPoolName,
    "storage pool name"
);

// =============================================================================
// Checked Numbers
// =============================================================================

macro_rules! checked_number {
    ($(#[$meta:meta])* $name:ident, $inner:ty, $kind:literal, $min:expr, $max:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub struct $name($inner);

        impl $name {
            pub const MIN: $inner = $min;
            pub const MAX: $inner = $max;

            /// Validate and construct
            pub fn new(value: i64) -> Result<Self> {
                if value < Self::MIN as i64 || value > Self::MAX as i64 {
                    return Err(Error::ValueOutOfRange {
                        kind: $kind,
                        value,
                        min: Self::MIN as i64,
                        max: Self::MAX as i64,
                    });
                }
                Ok(Self(value as $inner))
            }

            pub fn value(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<i64> for $name {
            type Error = Error;

            fn try_from(value: i64) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> i64 {
                value.0 as i64
            }
        }
    };
}

checked_number!(
    /// Volume number, unique within a resource definition
    VolumeNumber,
    u32,
    "volume number",
    0,
    65535
);
checked_number!(
    /// DRBD device minor number
    MinorNumber,
    u32,
    "minor number",
    0,
    1_048_575
);
checked_number!(
    /// DRBD replication TCP port
    TcpPortNumber,
    u32,
    "TCP port",
    1,
    65535
);
checked_number!(
    /// DRBD node id, unique per replicated resource
    NodeId,
    u32,
    "DRBD node id",
    0,
    31
);
checked_number!(
    /// Primary key of a layer resource object
    LayerId,
    u32,
    "layer resource id",
    0,
    i32::MAX as u32
);

// =============================================================================
// Composite Names
// =============================================================================

/// Identity of layer-definition-level data: one resource definition (or
/// snapshot definition) may fan out into several suffixed variants
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuffixedResourceName {
    pub rsc: ResourceName,
    pub snap: Option<SnapshotName>,
    pub suffix: String,
}

impl SuffixedResourceName {
    pub fn new(rsc: ResourceName, snap: Option<SnapshotName>, suffix: impl Into<String>) -> Self {
        Self {
            rsc,
            snap,
            suffix: suffix.into(),
        }
    }
}

impl fmt::Display for SuffixedResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.rsc, self.suffix)?;
        if let Some(snap) = &self.snap {
            write!(f, " (snapshot {})", snap)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_name_validation() {
        assert!(NodeName::new("node-1").is_ok());
        assert!(ResourceName::new("rscA").is_ok());
        assert!(ResourceName::new("my_rsc_01").is_ok());

        assert_matches!(NodeName::new("1node"), Err(Error::InvalidName { .. }));
        assert_matches!(NodeName::new("a"), Err(Error::InvalidName { .. }));
        assert_matches!(NodeName::new("bad:name"), Err(Error::InvalidName { .. }));
        assert_matches!(NodeName::new("bad/name"), Err(Error::InvalidName { .. }));
        assert_matches!(
            StorPoolName::new(&"x".repeat(NAME_MAX_LEN + 1)),
            Err(Error::InvalidName { .. })
        );
    }

    #[test]
    fn test_name_case_insensitive() {
        let a = ResourceName::new("rscA").unwrap();
        let b = ResourceName::new("RSCA").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), "RSCA");
        assert_eq!(a.display(), "rscA");
        assert_eq!(a.to_string(), "rscA");

        let restored = ResourceName::with_display("RSCA", "rscA").unwrap();
        assert_eq!(restored.display(), "rscA");
        assert!(ResourceName::with_display("OTHER", "rscA").is_err());
    }

    #[test]
    fn test_number_ranges() {
        assert!(VolumeNumber::new(0).is_ok());
        assert!(VolumeNumber::new(65535).is_ok());
        assert_matches!(VolumeNumber::new(-1), Err(Error::ValueOutOfRange { .. }));
        assert_matches!(TcpPortNumber::new(0), Err(Error::ValueOutOfRange { .. }));
        assert_matches!(NodeId::new(32), Err(Error::ValueOutOfRange { .. }));
        assert_eq!(MinorNumber::new(1000).unwrap().value(), 1000);
    }

    #[test]
    fn test_name_serde() {
        let name = NodeName::new("alpha").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"alpha\"");
        let back: NodeName = serde_json::from_str(&json).unwrap();
        assert_eq!(back.display(), "alpha");
        assert!(serde_json::from_str::<NodeName>("\"9\"").is_err());
    }
}
