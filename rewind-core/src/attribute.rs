/*!
Virtual attributes: the in-memory unit of one captured attribute.

A snapshot is a flat, ordered [`AttributeMap`] of [`VirtualAttribute`]s. Plain
attributes belong to the snapshot's origin entity; related attributes carry the
relation path leading from the origin to the entity that owns the value.
*/

use crate::value::AttributeValue;

/// Ordered relation names leading from the origin entity to a related entity
pub type RelationPath = Vec<String>;

/// Attribute captured directly from the origin entity
#[derive(Debug, Clone, PartialEq)]
pub struct PlainAttribute {
    pub name: String,
    pub value: AttributeValue,
    pub cast: Option<String>,
}

/// Attribute captured from an entity reached through `relation_path`
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedAttribute {
    pub name: String,
    pub value: AttributeValue,
    pub cast: Option<String>,
    pub relation_path: RelationPath,
}

/// One captured attribute, either plain or related
#[derive(Debug, Clone, PartialEq)]
pub enum VirtualAttribute {
    Plain(PlainAttribute),
    Related(RelatedAttribute),
}

impl VirtualAttribute {
    /// Create a plain attribute without a cast tag
    pub fn plain<S, V>(name: S, value: V) -> Self
    where
        S: Into<String>,
        V: Into<AttributeValue>,
    {
        Self::Plain(PlainAttribute {
            name: name.into(),
            value: value.into(),
            cast: None,
        })
    }

    /// Create a related attribute without a cast tag
    pub fn related<S, V, P, R>(name: S, value: V, relation_path: P) -> Self
    where
        S: Into<String>,
        V: Into<AttributeValue>,
        P: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self::Related(RelatedAttribute {
            name: name.into(),
            value: value.into(),
            cast: None,
            relation_path: relation_path.into_iter().map(Into::into).collect(),
        })
    }

    /// Attach a cast tag
    pub fn with_cast<S: Into<String>>(self, cast: S) -> Self {
        self.with_optional_cast(Some(cast.into()))
    }

    /// Replace the cast tag, clearing it when `None`
    pub fn with_optional_cast(mut self, cast: Option<String>) -> Self {
        match &mut self {
            Self::Plain(attr) => attr.cast = cast,
            Self::Related(attr) => attr.cast = cast,
        }
        self
    }

    /// Replace the value, keeping name, cast and relation path
    pub fn with_value<V: Into<AttributeValue>>(mut self, value: V) -> Self {
        match &mut self {
            Self::Plain(attr) => attr.value = value.into(),
            Self::Related(attr) => attr.value = value.into(),
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Plain(attr) => &attr.name,
            Self::Related(attr) => &attr.name,
        }
    }

    pub fn value(&self) -> &AttributeValue {
        match self {
            Self::Plain(attr) => &attr.value,
            Self::Related(attr) => &attr.value,
        }
    }

    pub fn cast(&self) -> Option<&str> {
        match self {
            Self::Plain(attr) => attr.cast.as_deref(),
            Self::Related(attr) => attr.cast.as_deref(),
        }
    }

    /// Relation path for related attributes, `None` for plain ones
    pub fn relation_path(&self) -> Option<&[String]> {
        match self {
            Self::Plain(_) => None,
            Self::Related(attr) => Some(&attr.relation_path),
        }
    }

    pub fn is_related(&self) -> bool {
        matches!(self, Self::Related(_))
    }
}

/// Insertion-ordered mapping of attribute name to [`VirtualAttribute`]
///
/// Names are unique. Inserting an attribute whose name is already present
/// replaces the earlier entry in place, so the first-seen position is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMap {
    entries: Vec<VirtualAttribute>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an attribute, returning the entry it replaced
    pub fn insert(&mut self, attribute: VirtualAttribute) -> Option<VirtualAttribute> {
        match self.position(attribute.name()) {
            Some(index) => Some(std::mem::replace(&mut self.entries[index], attribute)),
            None => {
                self.entries.push(attribute);
                None
            }
        }
    }

    /// Builder-style insert of a raw value as a plain attribute without cast
    pub fn with<S, V>(mut self, name: S, value: V) -> Self
    where
        S: Into<String>,
        V: Into<AttributeValue>,
    {
        self.insert(VirtualAttribute::plain(name, value));
        self
    }

    /// Builder-style insert of a pre-built attribute, used as-is
    pub fn with_attribute(mut self, attribute: VirtualAttribute) -> Self {
        self.insert(attribute);
        self
    }

    pub fn get(&self, name: &str) -> Option<&VirtualAttribute> {
        self.entries.iter().find(|attr| attr.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<VirtualAttribute> {
        self.position(name).map(|index| self.entries.remove(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, VirtualAttribute> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(VirtualAttribute::name)
    }

    /// Plain attributes in insertion order
    pub fn plain(&self) -> impl Iterator<Item = &VirtualAttribute> {
        self.entries.iter().filter(|attr| !attr.is_related())
    }

    /// Related attributes grouped by relation path, groups in first-seen order
    pub fn related_groups(&self) -> Vec<(&[String], Vec<&VirtualAttribute>)> {
        let mut groups: Vec<(&[String], Vec<&VirtualAttribute>)> = Vec::new();
        for attr in &self.entries {
            let Some(path) = attr.relation_path() else {
                continue;
            };
            match groups.iter_mut().find(|(existing, _)| *existing == path) {
                Some((_, members)) => members.push(attr),
                None => groups.push((path, vec![attr])),
            }
        }
        groups
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|attr| attr.name() == name)
    }
}

impl FromIterator<VirtualAttribute> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = VirtualAttribute>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl Extend<VirtualAttribute> for AttributeMap {
    fn extend<I: IntoIterator<Item = VirtualAttribute>>(&mut self, iter: I) {
        for attribute in iter {
            self.insert(attribute);
        }
    }
}

impl IntoIterator for AttributeMap {
    type Item = VirtualAttribute;
    type IntoIter = std::vec::IntoIter<VirtualAttribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a AttributeMap {
    type Item = &'a VirtualAttribute;
    type IntoIter = std::slice::Iter<'a, VirtualAttribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
