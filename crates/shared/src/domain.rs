use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(BranchId);
id_newtype!(ConversationId);
id_newtype!(MessageId);
id_newtype!(AdminId);

const PROVISIONAL_PREFIX: &str = "temp-";

impl MessageId {
    /// Fresh locally generated id for a message the backend has not confirmed yet.
    pub fn provisional() -> Self {
        Self(format!("{PROVISIONAL_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }
}

/// Who authored a message. The backend calls the counterpart `User`; typing
/// events use the lowercase spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SenderRole {
    #[serde(rename = "Admin", alias = "admin")]
    Admin,
    #[serde(rename = "User", alias = "user")]
    Counterpart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Confirmed,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Closed,
    #[serde(other)]
    Other,
}

impl ConversationStatus {
    pub fn as_query(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Other => "all",
        }
    }
}

/// A server-side subscription scope. Memberships belong to one connection and
/// are gone after a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Branch(BranchId),
    Conversation(ConversationId),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branch(id) => write!(f, "branch:{id}"),
            Self::Conversation(id) => write!(f, "chat:{id}"),
        }
    }
}

/// The branch the admin is working in, as remembered across reloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    pub id: BranchId,
    #[serde(default)]
    pub name: String,
}

impl BranchRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: BranchId::new(id),
            name: name.into(),
        }
    }
}
