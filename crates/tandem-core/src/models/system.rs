//! The two record stores and the ways a change can travel between them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One of the two systems kept in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum System {
    /// ERP document store; documents are addressed by `name`.
    Frappe,
    /// Relational backend; rows are addressed by `id`.
    Supabase,
}

impl System {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Frappe => Self::Supabase,
            Self::Supabase => Self::Frappe,
        }
    }

    /// Field holding the record's native identifier.
    #[must_use]
    pub const fn native_id_field(self) -> &'static str {
        match self {
            Self::Frappe => "name",
            Self::Supabase => "id",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Frappe => "frappe",
            Self::Supabase => "supabase",
        }
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for System {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "frappe" => Ok(Self::Frappe),
            "supabase" => Ok(Self::Supabase),
            other => Err(Error::invalid_direction(other, "?")),
        }
    }
}

/// Direction of a single sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    FrappeToSupabase,
    SupabaseToFrappe,
}

impl Direction {
    /// Direction for a change that originates in `source`.
    #[must_use]
    pub const fn from_source(source: System) -> Self {
        match source {
            System::Frappe => Self::FrappeToSupabase,
            System::Supabase => Self::SupabaseToFrappe,
        }
    }

    /// Validates a source/target pair; the two must differ.
    pub fn from_systems(source: System, target: System) -> crate::Result<Self> {
        if source == target {
            return Err(Error::invalid_direction(source, target));
        }
        Ok(Self::from_source(source))
    }

    #[must_use]
    pub const fn source(self) -> System {
        match self {
            Self::FrappeToSupabase => System::Frappe,
            Self::SupabaseToFrappe => System::Supabase,
        }
    }

    #[must_use]
    pub const fn target(self) -> System {
        self.source().opposite()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FrappeToSupabase => "frappe_to_supabase",
            Self::SupabaseToFrappe => "supabase_to_frappe",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical change verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
