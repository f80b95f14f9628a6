//! User lookups live outside the booking engine (accounts are another
//! service's problem). The engine only needs two questions answered:
//! is this client banned, and what do we call this user in a listing.

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Banned clients cannot create reservations.
    async fn is_banned(&self, user_id: Ulid) -> bool;

    /// Display name for listings. `None` when the user is unknown.
    async fn display_name(&self, user_id: Ulid) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct DirectoryUser {
    pub username: String,
    pub banned: bool,
}

/// In-process directory. Unknown users are allowed: an id the directory
/// has never heard of simply books under its raw ULID.
#[derive(Default)]
pub struct StaticDirectory {
    users: DashMap<Ulid, DirectoryUser>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: Ulid, username: impl Into<String>) {
        self.users.insert(
            user_id,
            DirectoryUser {
                username: username.into(),
                banned: false,
            },
        );
    }

    pub fn set_banned(&self, user_id: Ulid, banned: bool) {
        if let Some(mut user) = self.users.get_mut(&user_id) {
            user.banned = banned;
        } else {
            self.users.insert(
                user_id,
                DirectoryUser {
                    username: user_id.to_string(),
                    banned,
                },
            );
        }
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn is_banned(&self, user_id: Ulid) -> bool {
        self.users.get(&user_id).is_some_and(|u| u.banned)
    }

    async fn display_name(&self, user_id: Ulid) -> Option<String> {
        self.users.get(&user_id).map(|u| u.username.clone())
    }
}
