//! User entity
//!
//! Authentication and authorization live outside the core; this type only
//! carries ownership and the role flag the pipeline needs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Self::Admin,
            _ => Self::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// External opaque identifier
    pub uuid: Uuid,
    pub role: UserRole,
    pub active: bool,
}

impl User {
    pub fn new(role: UserRole) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            role,
            active: true,
        }
    }
}
