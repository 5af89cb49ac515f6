use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Customer,
    StoreOwner,
    Driver,
    Worker,
}

impl UserRole {
    pub fn to_str(&self) -> &str {
        match self {
            UserRole::Customer => "customer",
            UserRole::StoreOwner => "store_owner",
            UserRole::Driver => "driver",
            UserRole::Worker => "worker",
        }
    }
}

/// Caller identity as asserted by the identity provider's token.
/// Nothing here is looked up or re-verified against a user table.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: UserRole,
}
