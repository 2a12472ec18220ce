//! Owned item records and the group key used to bucket interchangeable items.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether an item stands on the floor or hangs on a wall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemKind {
    /// Floor object ("S" in the client protocol).
    Floor,
    /// Wall item, usually a poster ("I" in the client protocol).
    Wall,
}

impl ItemKind {
    /// Single-letter code the client protocol uses for this kind.
    pub fn code(self) -> &'static str {
        match self {
            ItemKind::Floor => "S",
            ItemKind::Wall => "I",
        }
    }
}

/// One physical item owned by the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Server-assigned id. Negative ids are synthesized locally for objects
    /// picked up from a room until a scan reports the real id.
    pub id: i64,
    /// Catalog class name.
    pub class: String,
    /// Floor or wall.
    pub kind: ItemKind,
    /// Colour/size descriptor for floor objects, poster selection for wall items.
    pub variant: String,
    /// Owner name as reported by the server.
    pub owner: String,
}

impl Item {
    /// Create an item with an empty owner.
    pub fn new(id: i64, class: impl Into<String>, kind: ItemKind, variant: impl Into<String>) -> Self {
        Self {
            id,
            class: class.into(),
            kind,
            variant: variant.into(),
            owner: String::new(),
        }
    }

    /// Builder-style owner assignment.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// The key identifying items interchangeable with this one.
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            class: self.class.clone(),
            kind: self.kind,
            variant: self.variant.clone(),
        }
    }

    /// `true` once the server has confirmed the id.
    pub fn is_confirmed(&self) -> bool {
        self.id > 0
    }
}

/// `(class, kind, variant)` identity shared by interchangeable items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    /// Catalog class name.
    pub class: String,
    /// Floor or wall.
    pub kind: ItemKind,
    /// Variant descriptor.
    pub variant: String,
}

impl GroupKey {
    /// Create a group key.
    pub fn new(class: impl Into<String>, kind: ItemKind, variant: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            kind,
            variant: variant.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.class, self.kind.code())?;
        if !self.variant.is_empty() {
            write!(f, " {}", self.variant)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_ignores_id_and_owner() {
        let a = Item::new(1, "chair_polyfon", ItemKind::Floor, "1x1 #ffffff").with_owner("alice");
        let b = Item::new(2, "chair_polyfon", ItemKind::Floor, "1x1 #ffffff").with_owner("bob");
        assert_eq!(a.group_key(), b.group_key());
    }

    #[test]
    fn test_group_key_distinguishes_variant_and_kind() {
        let poster_a = Item::new(1, "poster", ItemKind::Wall, "5003");
        let poster_b = Item::new(2, "poster", ItemKind::Wall, "5000");
        assert_ne!(poster_a.group_key(), poster_b.group_key());

        let floor = GroupKey::new("poster", ItemKind::Floor, "5003");
        assert_ne!(poster_a.group_key(), floor);
    }

    #[test]
    fn test_synthesized_ids_are_unconfirmed() {
        assert!(!Item::new(-3, "table", ItemKind::Floor, "").is_confirmed());
        assert!(Item::new(44, "table", ItemKind::Floor, "").is_confirmed());
    }

    #[test]
    fn test_group_key_display() {
        let key = GroupKey::new("poster", ItemKind::Wall, "5003");
        assert_eq!(key.to_string(), "poster (I) 5003");
        let key = GroupKey::new("table", ItemKind::Floor, "");
        assert_eq!(key.to_string(), "table (S)");
    }
}
