use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Enumeration of errors that occur when parsing an id from its hex form.
#[derive(Error, Debug)]
pub enum IdParseError {
    #[error("expected 32 hex characters, got {0}")]
    WrongLength(usize),
    #[error("invalid hex digit in id: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// A 128-bit opaque identifier, stored as raw bytes on disk and rendered as
/// lowercase hex everywhere else (wire JSON, URLs, logs).
macro_rules! id_type {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 16]);

        impl $name {
            /// A fresh id is a random 128-bit value.
            pub fn new() -> Self {
                let mut bytes = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut bytes);
                Self(bytes)
            }

            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.len() != 32 {
                    return Err(IdParseError::WrongLength(s.len()));
                }
                let decoded = hex::decode(s)?;
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&decoded);
                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $name::from_str(&s).map_err(de::Error::custom)
            }
        }
    };
}

id_type!(JobId);
id_type!(WorkerId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = JobId::new();
        let s = id.to_hex();
        assert_eq!(s.len(), 32);
        let parsed = JobId::from_str(&s).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn distinct_ids_are_not_equal() {
        // A fresh id is random; collisions are astronomically unlikely.
        assert_ne!(JobId::new(), JobId::new());
        assert_ne!(WorkerId::new(), WorkerId::new());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(JobId::from_str("abcd").is_err());
    }

    #[test]
    fn rejects_invalid_hex() {
        assert!(JobId::from_str("zz00000000000000000000000000000x").is_err());
    }

    #[test]
    fn json_round_trip() {
        let id = JobId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
