use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Read-only view of an account. Accounts are owned by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub role: String,
}
