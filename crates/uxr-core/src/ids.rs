use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A 128-bit identifier used for every persisted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let parsed = Uuid::parse_str(value.trim())
            .with_context(|| format!("'{value}' is not a valid entity id"))?;
        Ok(Self(parsed))
    }
}

impl From<Uuid> for EntityId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_new_ids_are_unique_and_round_trip_through_string() {
        let a = EntityId::new();
        let b = EntityId::new();
        assert_ne!(a, b);
        let parsed: EntityId = a.to_string().parse().expect("round trip");
        assert_eq!(a, parsed);
    }

    #[test]
    fn regression_from_str_rejects_garbage() {
        assert!("not-a-uuid".parse::<EntityId>().is_err());
    }
}
