//! Addressing: the identity the signaling service assigned to us, the room
//! tokens we hand out, and the display names of whoever we talk to.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

pub const ROOM_TOKEN_LEN: usize = 8;

/// Transport identity assigned by the signaling service
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Identity(String);

/// Short locally generated token that lets a caller find us
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RoomToken(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Identity(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl RoomToken {
    /// Fresh token: the first eight hex digits of a v4 UUID
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        RoomToken(uuid[..ROOM_TOKEN_LEN].to_string())
    }

    pub fn new(value: impl Into<String>) -> Self {
        RoomToken(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lookup table for local and peer addressing. No I/O.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    local: Option<Identity>,
    local_display_name: Option<String>,
    room_token: Option<RoomToken>,
    tokens: HashMap<RoomToken, Identity>,
    display_names: HashMap<Identity, String>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the identity of the current signaling connection
    pub fn assign_local(&mut self, identity: Identity) {
        if let Some(previous) = &self.local {
            if previous != &identity {
                debug!(%previous, %identity, "signaling identity replaced by new connection");
            }
        }
        if let Some(token) = &self.room_token {
            self.tokens.insert(token.clone(), identity.clone());
        }
        self.local = Some(identity);
    }

    /// Drops the connection identity; it is meaningless once the link is gone
    pub fn clear_local(&mut self) {
        if let Some(token) = &self.room_token {
            self.tokens.remove(token);
        }
        self.local = None;
    }

    pub fn local(&self) -> Option<&Identity> {
        self.local.as_ref()
    }

    pub fn set_local_display_name(&mut self, name: impl Into<String>) {
        self.local_display_name = Some(name.into());
    }

    pub fn local_display_name(&self) -> Option<&str> {
        self.local_display_name.as_deref()
    }

    /// Issues a new room token, retiring the previous one
    pub fn issue_room_token(&mut self) -> RoomToken {
        let mut token = RoomToken::generate();
        while Some(&token) == self.room_token.as_ref() {
            token = RoomToken::generate();
        }
        if let Some(old) = self.room_token.take() {
            self.tokens.remove(&old);
        }
        if let Some(local) = &self.local {
            self.tokens.insert(token.clone(), local.clone());
        }
        self.room_token = Some(token.clone());
        token
    }

    pub fn room_token(&self) -> Option<&RoomToken> {
        self.room_token.as_ref()
    }

    pub fn bind_token(&mut self, token: RoomToken, identity: Identity) {
        self.tokens.insert(token, identity);
    }

    /// Maps a dial target to an identity when the token is known, else passes it through
    pub fn resolve(&self, target: &str) -> Identity {
        self.tokens
            .get(&RoomToken::new(target))
            .cloned()
            .unwrap_or_else(|| Identity::new(target))
    }

    pub fn remember_display_name(&mut self, identity: &Identity, name: &str) {
        if name.trim().is_empty() {
            warn!(%identity, "peer sent a blank display name");
        }
        self.display_names.insert(identity.clone(), name.to_string());
    }

    pub fn display_name(&self, identity: &Identity) -> Option<&str> {
        if self.local.as_ref() == Some(identity) {
            return self.local_display_name.as_deref();
        }
        self.display_names.get(identity).map(String::as_str)
    }

    pub fn forget(&mut self, identity: &Identity) {
        self.display_names.remove(identity);
    }
}
