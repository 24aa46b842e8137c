//! Membership of the relay: which nickname belongs to which connection.
//!
//! Both indexes live behind one mutex so registration, removal and
//! snapshots are atomic with respect to each other. Snapshots are copied
//! out before the lock is released; delivery never happens under it.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::Mutex;

use crate::{
    connection::{ConnectionHandle, ConnectionId},
    error::RegisterError,
    protocol::Registration,
};

#[derive(Debug, Default)]
pub struct Registry {
    members: Mutex<Members>,
}

#[derive(Debug, Default)]
struct Members {
    by_nickname: BTreeMap<String, ConnectionHandle>,
    by_connection: HashMap<ConnectionId, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `registration.username` to `connection`.
    ///
    /// Incomplete registrations are refused before uniqueness is checked,
    /// and a refused attempt leaves the registry untouched.
    pub async fn register(
        &self,
        registration: &Registration,
        connection: &ConnectionHandle,
    ) -> Result<(), RegisterError> {
        if let Some(field) = registration.missing_field() {
            return Err(RegisterError::MissingField(field));
        }

        let nickname = &registration.username;
        let mut members = self.members.lock().await;

        if members.by_nickname.contains_key(nickname)
            || members.by_connection.contains_key(&connection.id())
        {
            return Err(RegisterError::AlreadyRegistered(nickname.clone()));
        }

        members
            .by_nickname
            .insert(nickname.clone(), connection.clone());
        members
            .by_connection
            .insert(connection.id(), nickname.clone());
        Ok(())
    }

    /// Remove whatever nickname `connection` holds.
    ///
    /// Returns the freed nickname the first time and `None` afterwards.
    pub async fn unregister(&self, connection: ConnectionId) -> Option<String> {
        let mut members = self.members.lock().await;
        let nickname = members.by_connection.remove(&connection)?;
        members.by_nickname.remove(&nickname);
        Some(nickname)
    }

    /// Point-in-time copy of every member, ordered by nickname.
    pub async fn snapshot(&self) -> Vec<(String, ConnectionHandle)> {
        let members = self.members.lock().await;
        members
            .by_nickname
            .iter()
            .map(|(nickname, handle)| (nickname.clone(), handle.clone()))
            .collect()
    }

    pub async fn nickname_of(&self, connection: ConnectionId) -> Option<String> {
        self.members
            .lock()
            .await
            .by_connection
            .get(&connection)
            .cloned()
    }

    pub async fn contains(&self, nickname: &str) -> bool {
        self.members.lock().await.by_nickname.contains_key(nickname)
    }

    pub async fn nicknames(&self) -> Vec<String> {
        self.members
            .lock()
            .await
            .by_nickname
            .keys()
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.by_nickname.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
