// Shared domain types for the InnoSphere chat relay.

use serde::{Deserialize, Serialize};

/// Database user identifier (BIGSERIAL on the platform schema).
pub type UserId = i64;

/// Database message identifier.
pub type MessageId = i64;

/// The two account roles that exist on the platform.
///
/// The role decides how a user's display name resolves: startups show their
/// company name, investors their firm name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Startup,
    Investor,
}

impl UserRole {
    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "startup" => Some(Self::Startup),
            "investor" => Some(Self::Investor),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Investor => "investor",
        }
    }
}
