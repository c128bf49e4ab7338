use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};

/// Name of the label holding the metric name.
pub const METRIC_NAME: &str = "__name__";

/// Separator written between label names and values when hashing.
const SEPARATOR: u8 = 0xff;

/// A single name/value pair of a series.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    /// The label name.
    pub name: String,
    /// The label value.
    pub value: String,
}

impl Label {
    /// Creates a new label.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A sorted set of labels identifying a series.
///
/// Labels are kept sorted by name and every name occurs at most once. Two label sets with the
/// same pairs are always equal and hash to the same value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Creates an empty label set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a label set from name/value pairs.
    ///
    /// Pairs are sorted by name. If a name occurs more than once, the last value wins.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: BTreeMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from(map)
    }

    /// Returns the value of the label with the given name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|label| label.name.as_str().cmp(name))
            .ok()
            .map(|index| self.0[index].value.as_str())
    }

    /// Returns `true` if a label with the given name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns an iterator over all labels in name order.
    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    /// Returns the number of labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no labels.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Computes the 64-bit identity hash of this label set.
    ///
    /// Every name and value is followed by a `0xff` byte, which cannot occur in valid UTF-8, so
    /// `{a="bc"}` and `{ab="c"}` hash differently.
    pub fn hash64(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        for label in &self.0 {
            hasher.write(label.name.as_bytes());
            hasher.write_u8(SEPARATOR);
            hasher.write(label.value.as_bytes());
            hasher.write_u8(SEPARATOR);
        }
        hasher.finish()
    }

    /// Returns a new label set with all `external` labels this set does not have.
    ///
    /// Labels of the series win over external labels with the same name.
    pub fn merge_external(&self, external: &Labels) -> Labels {
        if external.is_empty() {
            return self.clone();
        }

        let mut merged = Vec::with_capacity(self.len() + external.len());
        let mut own = self.0.iter().peekable();
        let mut ext = external.0.iter().peekable();

        loop {
            match (own.peek(), ext.peek()) {
                (Some(a), Some(b)) => match a.name.cmp(&b.name) {
                    std::cmp::Ordering::Less => merged.extend(own.next().cloned()),
                    std::cmp::Ordering::Greater => merged.extend(ext.next().cloned()),
                    std::cmp::Ordering::Equal => {
                        merged.extend(own.next().cloned());
                        ext.next();
                    }
                },
                (Some(_), None) => merged.extend(own.next().cloned()),
                (None, Some(_)) => merged.extend(ext.next().cloned()),
                (None, None) => break,
            }
        }

        Labels(merged)
    }

    /// Creates a builder to modify a copy of this label set.
    pub fn builder(&self) -> LabelsBuilder {
        LabelsBuilder::new(self)
    }
}

impl From<BTreeMap<String, String>> for Labels {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(
            map.into_iter()
                .map(|(name, value)| Label { name, value })
                .collect(),
        )
    }
}

impl From<Labels> for BTreeMap<String, String> {
    fn from(labels: Labels) -> Self {
        labels
            .0
            .into_iter()
            .map(|label| (label.name, label.value))
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for Labels
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for Labels {
    type Item = Label;
    type IntoIter = std::vec::IntoIter<Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, label) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        f.write_str("}")
    }
}

/// Incrementally modifies a label set.
///
/// Setting a label to an empty value removes it, matching the convention that an empty label
/// value is equivalent to an absent label.
#[derive(Clone, Debug, Default)]
pub struct LabelsBuilder {
    labels: BTreeMap<String, String>,
}

impl LabelsBuilder {
    /// Creates a builder initialized with the given labels.
    pub fn new(base: &Labels) -> Self {
        Self {
            labels: base
                .iter()
                .map(|label| (label.name.clone(), label.value.clone()))
                .collect(),
        }
    }

    /// Returns the current value of a label.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// Sets a label, removing it if `value` is empty.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        if value.is_empty() {
            self.labels.remove(&name);
        } else {
            self.labels.insert(name, value);
        }
        self
    }

    /// Removes a label.
    pub fn del(&mut self, name: &str) -> &mut Self {
        self.labels.remove(name);
        self
    }

    /// Keeps only labels for which the predicate returns `true`.
    pub fn retain(&mut self, mut f: impl FnMut(&str, &str) -> bool) -> &mut Self {
        self.labels.retain(|name, value| f(name, value));
        self
    }

    /// Iterates over the current labels in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the resulting label set.
    pub fn labels(&self) -> Labels {
        Labels::from(self.labels.clone())
    }
}
