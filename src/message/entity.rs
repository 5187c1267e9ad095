//! Entity references and the broker topics derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix shared by every diff-sync topic.
pub const TOPIC_PREFIX: &str = "diff:sync:";

/// Separator between the entity type and the entity id in a topic name.
pub const TOPIC_SEPARATOR: char = ':';

/// The shared resource a set of diff-sync stacks is converging on.
///
/// An entity type may not be empty and may not contain [`TOPIC_SEPARATOR`];
/// the id may contain anything except being empty. Because the type never
/// contains the separator, the first `:` after [`TOPIC_PREFIX`] always ends
/// the type, so distinct references always map to distinct topics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawEntityRef")]
pub struct EntityRef {
    entity_type: String,
    entity_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntityRef {
    entity_type: String,
    entity_id: String,
}

impl TryFrom<RawEntityRef> for EntityRef {
    type Error = Error;

    fn try_from(raw: RawEntityRef) -> Result<Self> {
        EntityRef::new(raw.entity_type, raw.entity_id)
    }
}

impl EntityRef {
    /// Create a validated entity reference.
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Result<Self> {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();

        if entity_type.is_empty() {
            return Err(Error::InvalidEntity("entity type is empty".into()));
        }
        if entity_type.contains(TOPIC_SEPARATOR) {
            return Err(Error::InvalidEntity(format!(
                "entity type {:?} contains the topic separator {:?}",
                entity_type, TOPIC_SEPARATOR
            )));
        }
        if entity_id.is_empty() {
            return Err(Error::InvalidEntity(format!(
                "entity id for type {:?} is empty",
                entity_type
            )));
        }

        Ok(Self {
            entity_type,
            entity_id,
        })
    }

    /// The entity type, e.g. `document`.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// The entity id within its type.
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Broker topic carrying every diff-sync message for this entity.
    pub fn topic(&self) -> Topic {
        Topic(format!(
            "{}{}{}{}",
            TOPIC_PREFIX, self.entity_type, TOPIC_SEPARATOR, self.entity_id
        ))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.entity_type, TOPIC_SEPARATOR, self.entity_id)
    }
}

/// Name of a broker topic, always of the form `diff:sync:{entityType}:{entityId}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    /// Topic for the given entity.
    pub fn for_entity(entity: &EntityRef) -> Self {
        entity.topic()
    }

    /// Parse a topic name back into the entity it was derived from.
    pub fn parse(name: &str) -> Result<Self> {
        Self::entity_of(name).map(|entity| entity.topic())
    }

    /// The entity this topic belongs to.
    pub fn entity(&self) -> Result<EntityRef> {
        Self::entity_of(&self.0)
    }

    /// The topic name as sent to the broker.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn entity_of(name: &str) -> Result<EntityRef> {
        let rest = name.strip_prefix(TOPIC_PREFIX).ok_or_else(|| {
            Error::InvalidEntity(format!("topic {:?} lacks prefix {:?}", name, TOPIC_PREFIX))
        })?;
        let (entity_type, entity_id) = rest.split_once(TOPIC_SEPARATOR).ok_or_else(|| {
            Error::InvalidEntity(format!("topic {:?} has no entity id", name))
        })?;
        EntityRef::new(entity_type, entity_id)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_name() {
        let entity = EntityRef::new("document", "abc").unwrap();
        assert_eq!(entity.topic().as_str(), "diff:sync:document:abc");
        // stable across calls
        assert_eq!(entity.topic(), entity.topic());
    }

    #[test]
    fn test_topic_differs_per_entity() {
        let a = EntityRef::new("document", "abc").unwrap();
        let b = EntityRef::new("document", "abd").unwrap();
        let c = EntityRef::new("sheet", "abc").unwrap();

        assert_ne!(a.topic(), b.topic());
        assert_ne!(a.topic(), c.topic());
        assert_ne!(b.topic(), c.topic());
    }

    #[test]
    fn test_separator_in_type_rejected() {
        // "a:b" + "c" and "a" + "b:c" would otherwise both become diff:sync:a:b:c
        assert!(EntityRef::new("a:b", "c").is_err());

        let ok = EntityRef::new("a", "b:c").unwrap();
        assert_eq!(ok.topic().as_str(), "diff:sync:a:b:c");
        assert_eq!(ok.topic().entity().unwrap(), ok);
    }

    #[test]
    fn test_empty_parts_rejected() {
        assert!(matches!(
            EntityRef::new("", "abc"),
            Err(Error::InvalidEntity(_))
        ));
        assert!(matches!(
            EntityRef::new("document", ""),
            Err(Error::InvalidEntity(_))
        ));
    }

    #[test]
    fn test_topic_parse() {
        let topic = Topic::parse("diff:sync:document:doc-1").unwrap();
        assert_eq!(
            topic.entity().unwrap(),
            EntityRef::new("document", "doc-1").unwrap()
        );

        assert!(Topic::parse("other:document:doc-1").is_err());
        assert!(Topic::parse("diff:sync:document").is_err());
    }

    #[test]
    fn test_entity_serde_validates() {
        let entity: EntityRef =
            serde_json::from_str(r#"{"entityType":"document","entityId":"42"}"#).unwrap();
        assert_eq!(entity.entity_type(), "document");
        assert_eq!(entity.entity_id(), "42");

        let bad = serde_json::from_str::<EntityRef>(r#"{"entityType":"a:b","entityId":"42"}"#);
        assert!(bad.is_err());
    }
}
