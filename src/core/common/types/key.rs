use super::attribute::Attribute;

/// Maximum number of attributes a key may carry.
pub const MAX_KEY_ATTRIBUTES: usize = 255;

/// A multidimensional key: an ordered sequence of attribute values.
///
/// Record keys are total; every slot carries a value. Query bounds with
/// wildcard slots are expressed as a [`KeyPattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    attributes: Vec<Attribute>,
}

impl Key {
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Key { attributes }
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }
}

impl From<Vec<Attribute>> for Key {
    fn from(attributes: Vec<Attribute>) -> Self {
        Key::new(attributes)
    }
}

/// A query-bound key where individual slots may be wildcards.
///
/// A wildcard (`None`) slot places no constraint on that attribute position:
/// it stands for the minimum of the attribute's domain when the pattern is
/// used as a lower bound and for the maximum when used as an upper bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    attributes: Vec<Option<Attribute>>,
}

impl KeyPattern {
    pub fn new(attributes: Vec<Option<Attribute>>) -> Self {
        KeyPattern { attributes }
    }

    /// A pattern of `count` wildcard slots (no constraint on any position).
    pub fn wildcard(count: usize) -> Self {
        KeyPattern { attributes: vec![None; count] }
    }

    pub fn attributes(&self) -> &[Option<Attribute>] {
        &self.attributes
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }
}

impl From<Vec<Option<Attribute>>> for KeyPattern {
    fn from(attributes: Vec<Option<Attribute>>) -> Self {
        KeyPattern::new(attributes)
    }
}

impl From<&Key> for KeyPattern {
    /// A fully-present pattern matching exactly this key.
    fn from(key: &Key) -> Self {
        KeyPattern { attributes: key.attributes().iter().cloned().map(Some).collect() }
    }
}
