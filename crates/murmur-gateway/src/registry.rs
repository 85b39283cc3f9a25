use uuid::Uuid;

use murmur_types::models::{ActiveUser, GroupSummary};

/// Placeholder for a group member whose presence entry is gone.
pub const UNKNOWN_USERNAME: &str = "Unknown";

/// Who a connection authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub username: String,
}

/// Connection id -> authenticated user, in registration order.
///
/// The same user id may be bound to several connections (one per tab).
#[derive(Debug, Default)]
pub struct Presence {
    entries: Vec<(Uuid, PresenceEntry)>,
}

impl Presence {
    /// Bind a connection to a user, overwriting any previous binding in place.
    pub fn register(&mut self, conn_id: Uuid, user_id: Uuid, username: String) {
        let entry = PresenceEntry { user_id, username };
        match self.entries.iter_mut().find(|(id, _)| *id == conn_id) {
            Some((_, existing)) => *existing = entry,
            None => self.entries.push((conn_id, entry)),
        }
    }

    pub fn unregister(&mut self, conn_id: Uuid) -> Option<PresenceEntry> {
        let idx = self.entries.iter().position(|(id, _)| *id == conn_id)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn get(&self, conn_id: Uuid) -> Option<&PresenceEntry> {
        self.entries
            .iter()
            .find(|(id, _)| *id == conn_id)
            .map(|(_, entry)| entry)
    }

    pub fn list(&self) -> Vec<ActiveUser> {
        self.entries
            .iter()
            .map(|(conn_id, entry)| ActiveUser {
                socket_id: *conn_id,
                username: entry.username.clone(),
                user_id: entry.user_id,
            })
            .collect()
    }

    /// First connection (by registration order) bound to `user_id`.
    pub fn find_by_user_id(&self, user_id: Uuid) -> Option<Uuid> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.user_id == user_id)
            .map(|(conn_id, _)| *conn_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
struct Group {
    name: String,
    members: Vec<Uuid>,
}

/// Group name -> member connections, in creation order.
///
/// Groups are never removed, even once their last member leaves.
#[derive(Debug, Default)]
pub struct Groups {
    groups: Vec<Group>,
}

impl Groups {
    /// Returns true if the group did not exist yet.
    pub fn create_or_get(&mut self, name: &str) -> bool {
        if self.groups.iter().any(|g| g.name == name) {
            return false;
        }
        self.groups.push(Group {
            name: name.to_string(),
            members: Vec::new(),
        });
        true
    }

    /// Add a connection to a group, creating the group if needed.
    /// Returns false if the connection was already a member.
    pub fn add_member(&mut self, name: &str, conn_id: Uuid) -> bool {
        self.create_or_get(name);
        let Some(group) = self.groups.iter_mut().find(|g| g.name == name) else {
            return false;
        };
        if group.members.contains(&conn_id) {
            return false;
        }
        group.members.push(conn_id);
        true
    }

    /// Drop a connection from every group. Returns how many groups it left.
    pub fn remove_member_everywhere(&mut self, conn_id: Uuid) -> usize {
        let mut left = 0;
        for group in &mut self.groups {
            let before = group.members.len();
            group.members.retain(|id| *id != conn_id);
            left += before - group.members.len();
        }
        left
    }

    pub fn members(&self, name: &str) -> Vec<Uuid> {
        self.groups
            .iter()
            .find(|g| g.name == name)
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.name == name)
    }

    /// Every group with member usernames resolved through `presence`.
    pub fn list(&self, presence: &Presence) -> Vec<GroupSummary> {
        self.groups
            .iter()
            .map(|g| GroupSummary {
                group_name: g.name.clone(),
                members: g
                    .members
                    .iter()
                    .map(|conn_id| {
                        presence
                            .get(*conn_id)
                            .map(|p| p.username.clone())
                            .unwrap_or_else(|| UNKNOWN_USERNAME.to_string())
                    })
                    .collect(),
                member_count: g.members.len(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// All in-memory gateway state. Owned by the [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Default)]
pub struct Registry {
    pub presence: Presence,
    pub groups: Groups,
}
