//! Room display state.

use crate::message::RoomUpdate;

/// What the room panel shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomState {
    pub image_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub exits: Option<String>,
}

impl From<RoomUpdate> for RoomState {
    fn from(update: RoomUpdate) -> Self {
        Self {
            image_url: update.image,
            title: update.title,
            description: update.description,
            exits: update.exits,
        }
    }
}

/// Holds the latest room; absent until the first update.
#[derive(Debug, Clone, Default)]
pub struct RoomProjector {
    current: Option<RoomState>,
}

impl RoomProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every field from `update`. Missing fields become absent.
    ///
    /// # Returns
    ///
    /// The state now shown.
    pub fn apply(&mut self, update: RoomUpdate) -> &RoomState {
        self.current.insert(RoomState::from(update))
    }

    pub fn current(&self) -> Option<&RoomState> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_room() -> RoomUpdate {
        RoomUpdate {
            image: Some("hall.png".into()),
            title: Some("Hall".into()),
            description: Some("A long hall".into()),
            exits: Some("north".into()),
        }
    }

    #[test]
    fn test_absent_until_first_update() {
        let projector = RoomProjector::new();
        assert!(projector.current().is_none());
    }

    #[test]
    fn test_partial_update_overwrites_everything() {
        let mut projector = RoomProjector::new();
        projector.apply(full_room());

        let state = projector.apply(RoomUpdate {
            title: Some("X".into()),
            ..Default::default()
        });
        assert_eq!(
            state,
            &RoomState {
                title: Some("X".into()),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_clear() {
        let mut projector = RoomProjector::new();
        projector.apply(full_room());
        projector.clear();
        assert!(projector.current().is_none());
    }
}
