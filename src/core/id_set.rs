//! Mechanic id sets used as booking exclusion lists.
//!
//! Bookings persist their blacklisted and visited mechanics as opaque text.
//! [`MechanicIdSet`] is the typed view of that text: it encodes to a JSON array
//! of UUID strings and decodes strictly. A value that does not decode is a
//! [`DecodeError`], never an empty set, because a booking whose exclusion state
//! cannot be read must not be reassigned.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::model::MechanicId;

/// Failure to decode an encoded id set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot decode {field} id set: {reason}")]
pub struct DecodeError {
    /// Which booking field was being decoded.
    pub field: &'static str,
    /// Parser message.
    pub reason: String,
}

/// Encoded form of a [`MechanicIdSet`] as persisted on a booking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedIdSet(String);

impl EncodedIdSet {
    /// Wrap raw persisted text without validating it.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Raw persisted text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode into a set, naming `field` in any error.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the text is not a JSON array of UUIDs.
    pub fn decode(&self, field: &'static str) -> Result<MechanicIdSet, DecodeError> {
        MechanicIdSet::decode(&self.0, field)
    }
}

impl fmt::Display for EncodedIdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Set of mechanic ids with insertion-independent, sorted iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MechanicIdSet {
    ids: BTreeSet<MechanicId>,
}

impl MechanicIdSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is a member.
    #[must_use]
    pub fn contains(&self, id: &MechanicId) -> bool {
        self.ids.contains(id)
    }

    /// Add `id`; returns false if it was already present.
    pub fn insert(&mut self, id: MechanicId) -> bool {
        self.ids.insert(id)
    }

    /// Remove every member.
    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &MechanicId> {
        self.ids.iter()
    }

    /// Encode as a JSON array of UUID strings.
    #[must_use]
    pub fn encode(&self) -> EncodedIdSet {
        let items: Vec<String> = self.ids.iter().map(Uuid::to_string).collect();
        // Vec<String> always serializes.
        EncodedIdSet(serde_json::to_string(&items).unwrap_or_else(|_| "[]".into()))
    }

    /// Decode persisted text. Blank text is the empty set.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] for anything other than a JSON array of UUID
    /// strings (including `null`).
    pub fn decode(raw: &str, field: &'static str) -> Result<Self, DecodeError> {
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        let items: Vec<String> = serde_json::from_str(raw).map_err(|e| DecodeError {
            field,
            reason: e.to_string(),
        })?;
        items
            .iter()
            .map(|s| {
                Uuid::parse_str(s).map_err(|e| DecodeError {
                    field,
                    reason: format!("`{s}`: {e}"),
                })
            })
            .collect::<Result<BTreeSet<_>, _>>()
            .map(|ids| Self { ids })
    }
}

impl FromIterator<MechanicId> for MechanicIdSet {
    fn from_iter<I: IntoIterator<Item = MechanicId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
