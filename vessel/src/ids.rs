//! Typed record identifiers.
//!
//! Containers and sandboxes are identified by ULIDs. The timestamp prefix of
//! a ULID makes creation-order sorting a plain string comparison.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! ulid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Length of a full ID (26 chars, ULID format).
            pub const FULL_LENGTH: usize = 26;

            /// Length of the short display form.
            pub const SHORT_LENGTH: usize = 8;

            /// Generate a fresh ULID-based ID.
            pub fn generate() -> Self {
                Self(ulid::Ulid::new().to_string())
            }

            /// Parse an ID from an existing string.
            ///
            /// Returns `None` if the string is not a valid 26-char ULID.
            pub fn parse(s: &str) -> Option<Self> {
                if Self::is_valid(s) {
                    Some(Self(s.to_string()))
                } else {
                    None
                }
            }

            /// Check whether a string is a valid ID.
            pub fn is_valid(s: &str) -> bool {
                s.len() == Self::FULL_LENGTH && ulid::Ulid::from_string(s).is_ok()
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First 8 characters, for display.
            pub fn short(&self) -> &str {
                &self.0[..Self::SHORT_LENGTH]
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
    };
}

ulid_id! {
    /// Opaque container identifier, globally unique within the host.
    ContainerId
}

ulid_id! {
    /// Opaque pod sandbox identifier.
    SandboxId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_valid() {
        let a = ContainerId::generate();
        let b = ContainerId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), ContainerId::FULL_LENGTH);
        assert!(ContainerId::is_valid(a.as_str()));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ContainerId::parse("not-an-id").is_none());
        assert!(ContainerId::parse("").is_none());
        let id = SandboxId::generate();
        assert_eq!(SandboxId::parse(id.as_str()), Some(id));
    }

    #[test]
    fn short_form_is_prefix() {
        let id = ContainerId::generate();
        assert!(id.as_str().starts_with(id.short()));
        assert_eq!(id.short().len(), ContainerId::SHORT_LENGTH);
    }
}
