use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::engine::{Engine, EngineError};
use crate::model::*;

/// Room lookup consumed by the booking service.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn find_room_by_id(&self, id: RoomId) -> Option<Room>;
}

/// User lookup consumed by the booking service and the urge throttle.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_id(&self, id: UserId) -> Option<User>;
    async fn find_admin_user(&self) -> Option<User>;
}

#[async_trait]
impl RoomDirectory for Engine {
    async fn find_room_by_id(&self, id: RoomId) -> Option<Room> {
        self.get_room(id)
    }
}

#[async_trait]
impl UserDirectory for Engine {
    async fn find_user_by_id(&self, id: UserId) -> Option<User> {
        self.get_user(id)
    }

    async fn find_admin_user(&self) -> Option<User> {
        self.first_admin()
    }
}

/// Initial catalog for a fresh organization, read from JSON:
/// `{"rooms": [{"id": 1, "name": "...", ...}], "users": [...]}`.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub users: Vec<User>,
}

impl Seed {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> std::io::Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Register every room and user. Existing ids are replaced.
    pub async fn apply(&self, engine: &Engine) -> Result<(), EngineError> {
        for user in &self.users {
            engine.register_user(user.clone()).await?;
        }
        for room in &self.rooms {
            engine.register_room(room.clone()).await?;
        }
        Ok(())
    }
}
