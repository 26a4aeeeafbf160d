//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
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

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
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

string_newtype!(
    /// SHA-256 content digest rendered in Nix base-32, as consumed by `fetchurl`.
    ContentHash
);

string_newtype!(
    /// A version-control revision (commit id) pinned by the lockfile.
    Revision
);

const NIX_BASE32_ALPHABET: &[u8; 32] = b"0123456789abcdfghijklmnpqrsvwxyz";

impl ContentHash {
    /// Encode a raw SHA-256 digest with Nix's base-32 alphabet.
    ///
    /// Nix reads the digest least-significant-bit first and emits the most
    /// significant character first, so this is not RFC 4648 base-32.
    pub fn from_sha256_digest(digest: &[u8]) -> Self {
        if digest.is_empty() {
            return Self(String::new());
        }
        let len = (digest.len() * 8 - 1) / 5 + 1;
        let mut out = String::with_capacity(len);
        for n in (0..len).rev() {
            let bit = n * 5;
            let i = bit / 8;
            let j = bit % 8;
            let low = u16::from(digest[i]) >> j;
            let high = if i + 1 < digest.len() {
                u16::from(digest[i + 1]) << (8 - j)
            } else {
                0
            };
            out.push(char::from(NIX_BASE32_ALPHABET[usize::from((low | high) & 0x1f)]));
        }
        Self(out)
    }
}
