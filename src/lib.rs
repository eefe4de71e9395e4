#![crate_type = "rlib"]

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;
#[cfg(feature = "postgres")]
#[macro_use]
extern crate diesel;
#[cfg(feature = "postgres")]
#[macro_use]
extern crate diesel_derive_enum;
#[cfg(feature = "postgres")]
#[macro_use]
extern crate diesel_migrations;

pub mod audit;
pub mod clock;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod field;
pub mod files;
pub mod models;
pub mod notify;
pub mod order;
pub mod recipient;
pub mod render;
#[cfg(feature = "postgres")]
mod schema;
pub mod store;
pub mod token;

pub use crate::config::Config;
pub use crate::engine::{Completion, Engine, RecipientAccess, SignOutcome, SigningView};
pub use crate::error::{Error, Result};

use sha2::Digest;
use std::marker::PhantomData;

/// Prefix carried by a [`TypedUUIDField`] when rendered as a string.
pub trait IdKind {
    const PREFIX: &'static str;
}

macro_rules! id_kind {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name;

        impl IdKind for $name {
            const PREFIX: &'static str = $prefix;
        }
    };
}

id_kind!(DocumentKind, "esign_document");
id_kind!(RecipientKind, "esign_recipient");
id_kind!(FieldKind, "esign_field");
id_kind!(AuditKind, "esign_audit");

pub type DocumentId = TypedUUIDField<DocumentKind>;
pub type RecipientId = TypedUUIDField<RecipientKind>;
pub type FieldId = TypedUUIDField<FieldKind>;
pub type AuditEntryId = TypedUUIDField<AuditKind>;

/// Parsing accepts the prefixed and bare forms.
pub struct TypedUUIDField<K: IdKind> {
    pub uuid: uuid::Uuid,
    kind: PhantomData<K>,
}

impl<K: IdKind> TypedUUIDField<K> {
    pub fn new() -> Self {
        Self::from(uuid::Uuid::new_v4())
    }
}

impl<K: IdKind> From<uuid::Uuid> for TypedUUIDField<K> {
    fn from(uuid: uuid::Uuid) -> Self {
        Self {
            uuid,
            kind: PhantomData,
        }
    }
}

impl<K: IdKind> Default for TypedUUIDField<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: IdKind> Clone for TypedUUIDField<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: IdKind> Copy for TypedUUIDField<K> {}

impl<K: IdKind> PartialEq for TypedUUIDField<K> {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl<K: IdKind> Eq for TypedUUIDField<K> {}

impl<K: IdKind> PartialOrd for TypedUUIDField<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: IdKind> Ord for TypedUUIDField<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.uuid.cmp(&other.uuid)
    }
}

impl<K: IdKind> std::hash::Hash for TypedUUIDField<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state)
    }
}

impl<K: IdKind> std::fmt::Display for TypedUUIDField<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{}_{}",
            K::PREFIX,
            self.uuid.to_simple().encode_lower(&mut uuid::Uuid::encode_buffer())
        ))
    }
}

impl<K: IdKind> std::fmt::Debug for TypedUUIDField<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl<K: IdKind> std::str::FromStr for TypedUUIDField<K> {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bare = s
            .strip_prefix(K::PREFIX)
            .and_then(|rest| rest.strip_prefix('_'))
            .unwrap_or(s);
        match uuid::Uuid::parse_str(bare) {
            Ok(uuid) => Ok(Self::from(uuid)),
            Err(_) => Err(Error::Validation(format!("invalid {} id: {}", K::PREFIX, s))),
        }
    }
}

impl<K: IdKind> serde::Serialize for TypedUUIDField<K> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de, K: IdKind> serde::Deserialize<'de> for TypedUUIDField<K> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(|err: Error| D::Error::custom(err.to_string()))
    }
}

pub fn hash_slice(data: &[u8]) -> Vec<u8> {
    let mut hasher = sha2::Sha512::new();
    hasher.update(data);
    hasher.finalize().as_slice().into()
}
