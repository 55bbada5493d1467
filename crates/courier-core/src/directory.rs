//! Room directory: the server-wide socket registry and fan-out primitive.
//!
//! The directory is the single shared mutable resource in the routing
//! layer. It is shared by every server endpoint and performs its own
//! synchronization; membership mutation and fan-out snapshots are
//! serialized per room, so a fan-out either sees a member or does not.

use std::collections::HashSet;
use std::sync::Arc;

use courier_protocol::Message;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::channel::Channel;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// Directory errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// Invalid room name.
    #[error("invalid room name: {0}")]
    InvalidRoom(&'static str),

    /// Maximum number of rooms reached.
    #[error("maximum number of rooms reached")]
    MaxRooms,

    /// The socket reached its per-socket room limit.
    #[error("socket {0} reached its room limit")]
    MaxRoomsPerSocket(String),
}

/// Validate a room name.
///
/// Room names double as fan-out targets inside composite addresses, so the
/// address separators `:` and `,` are reserved.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("room name too long");
    }
    if name.contains(':') || name.contains(',') {
        return Err("room name contains a reserved character");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("room name contains invalid characters");
    }
    Ok(())
}

/// Directory configuration.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Maximum number of rooms.
    pub max_rooms: usize,
    /// Maximum rooms a single socket may join.
    pub max_rooms_per_socket: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            max_rooms_per_socket: 100,
        }
    }
}

/// Fan-out scope for one directory emit.
///
/// Delivery goes to the union of the named sockets and the named rooms'
/// members, minus any id in `except`. An empty scope (no sockets, no rooms)
/// addresses every registered socket.
#[derive(Debug, Clone, Default)]
pub struct EmitScope {
    /// Socket ids to deliver to.
    pub sockets: Vec<String>,
    /// Rooms whose members should be delivered to.
    pub rooms: Vec<String>,
    /// Socket ids excluded from delivery.
    pub except: Vec<String>,
}

impl EmitScope {
    /// Address every registered socket.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Address the given socket ids.
    #[must_use]
    pub fn to_sockets(sockets: Vec<String>) -> Self {
        Self {
            sockets,
            ..Self::default()
        }
    }

    /// Address the members of the given rooms.
    #[must_use]
    pub fn to_rooms(rooms: Vec<String>) -> Self {
        Self {
            rooms,
            ..Self::default()
        }
    }

    /// Exclude a socket id from delivery.
    #[must_use]
    pub fn except(mut self, id: impl Into<String>) -> Self {
        self.except.push(id.into());
        self
    }
}

/// Directory statistics.
#[derive(Debug, Clone)]
pub struct DirectoryStats {
    /// Number of registered sockets.
    pub socket_count: usize,
    /// Number of rooms with at least one member.
    pub room_count: usize,
    /// Total room memberships across all sockets.
    pub total_memberships: usize,
}

/// The server-wide room directory.
///
/// Maps socket ids to their channels and room names to member sets, and
/// supplies the fan-out primitive used by every server endpoint.
#[derive(Default)]
pub struct RoomDirectory {
    /// Registered sockets, keyed by id.
    sockets: DashMap<String, Arc<dyn Channel>>,
    /// Room membership, keyed by room name.
    rooms: DashMap<String, HashSet<String>>,
    /// Reverse index: socket id to joined rooms.
    memberships: DashMap<String, HashSet<String>>,
    /// Configuration.
    config: DirectoryConfig,
}

impl RoomDirectory {
    /// Create a directory with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DirectoryConfig::default())
    }

    /// Create a directory with custom configuration.
    #[must_use]
    pub fn with_config(config: DirectoryConfig) -> Self {
        Self {
            sockets: DashMap::new(),
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            config,
        }
    }

    /// Register a socket's channel under its id.
    pub fn register(&self, id: impl Into<String>, channel: Arc<dyn Channel>) {
        let id = id.into();
        debug!(socket = %id, "socket registered");
        self.sockets.insert(id, channel);
    }

    /// Remove a socket and all of its room memberships.
    pub fn unregister(&self, id: &str) {
        self.leave_all(id);
        if self.sockets.remove(id).is_some() {
            debug!(socket = %id, "socket unregistered");
        }
    }

    /// Whether a socket id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.sockets.contains_key(id)
    }

    /// Add a socket to a room.
    ///
    /// Joining a room twice is a no-op. Sockets unknown to the directory may
    /// join; fan-out simply skips members with no registered channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the room name is invalid or a limit is exceeded.
    pub fn join(&self, room: &str, id: &str) -> Result<(), DirectoryError> {
        validate_room_name(room).map_err(DirectoryError::InvalidRoom)?;

        {
            let mut joined = self.memberships.entry(id.to_string()).or_default();
            if !joined.contains(room) {
                if joined.len() >= self.config.max_rooms_per_socket {
                    return Err(DirectoryError::MaxRoomsPerSocket(id.to_string()));
                }
                if !self.rooms.contains_key(room) && self.rooms.len() >= self.config.max_rooms {
                    return Err(DirectoryError::MaxRooms);
                }
                joined.insert(room.to_string());
            }
        }

        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(id.to_string());

        debug!(room = %room, socket = %id, "joined room");
        Ok(())
    }

    /// Remove a socket from a room. Rooms with no members left are dropped.
    pub fn leave(&self, room: &str, id: &str) {
        self.remove_member(room, id);
        if let Some(mut joined) = self.memberships.get_mut(id) {
            joined.remove(room);
        }
        debug!(room = %room, socket = %id, "left room");
    }

    /// Remove a socket from every room it joined.
    pub fn leave_all(&self, id: &str) {
        if let Some((_, rooms)) = self.memberships.remove(id) {
            for room in rooms {
                self.remove_member(&room, id);
            }
            debug!(socket = %id, "left all rooms");
        }
    }

    fn remove_member(&self, room: &str, id: &str) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(id);
            let empty = members.is_empty();
            drop(members);
            if empty {
                self.rooms.remove_if(room, |_, members| members.is_empty());
            }
        }
    }

    /// Deliver a data message to every socket in scope.
    ///
    /// Returns the number of sockets the message was handed off to.
    pub fn emit(&self, event: &str, payload: &[u8], scope: &EmitScope) -> usize {
        let mut recipients: HashSet<String> = HashSet::new();

        if scope.sockets.is_empty() && scope.rooms.is_empty() {
            for entry in self.sockets.iter() {
                recipients.insert(entry.key().clone());
            }
        } else {
            recipients.extend(scope.sockets.iter().cloned());
            for room in &scope.rooms {
                if let Some(members) = self.rooms.get(room) {
                    recipients.extend(members.iter().cloned());
                }
            }
        }

        for id in &scope.except {
            recipients.remove(id);
        }

        let mut delivered = 0;
        for id in recipients {
            if let Some(channel) = self.sockets.get(&id) {
                match channel.send(Message::data(event, payload.to_vec())) {
                    Ok(()) => delivered += 1,
                    Err(err) => warn!(socket = %id, error = %err, "fan-out send failed"),
                }
            }
        }

        trace!(event = %event, recipients = delivered, "fan-out complete");
        delivered
    }

    /// Member ids of a room.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Rooms a socket has joined.
    #[must_use]
    pub fn rooms_of(&self, id: &str) -> Vec<String> {
        self.memberships
            .get(id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get directory statistics.
    #[must_use]
    pub fn stats(&self) -> DirectoryStats {
        DirectoryStats {
            socket_count: self.sockets.len(),
            room_count: self.rooms.len(),
            total_memberships: self.memberships.iter().map(|m| m.len()).sum(),
        }
    }
}
