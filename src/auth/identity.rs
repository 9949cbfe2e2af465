use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Account kinds of the marketplace. Every connection is auto-joined to the
/// role room of its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Seller,
    Dealer,
    Mechanic,
    Towing,
    Admin,
    Guest,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::User,
        Role::Seller,
        Role::Dealer,
        Role::Mechanic,
        Role::Towing,
        Role::Admin,
        Role::Guest,
    ];

    pub fn as_str(&self) -> &'static str {
        use Role::*;
        match self {
            User => "user",
            Seller => "seller",
            Dealer => "dealer",
            Mechanic => "mechanic",
            Towing => "towing",
            Admin => "admin",
            Guest => "guest",
        }
    }

    /// Lenient parse used for token claims: anything unknown is a plain user.
    pub fn parse_or_user(value: Option<&str>) -> Role {
        value
            .and_then(|value| value.parse().ok())
            .unwrap_or(Role::User)
    }
}

impl FromStr for Role {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ChatError::MalformedPayload(format!("unknown role {s:?}")))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (id, role, display name) triple established at handshake time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: Role, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            display_name: display_name.into(),
        }
    }
}
