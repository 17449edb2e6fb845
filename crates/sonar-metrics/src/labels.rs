//! Label name normalization and the fixed label set shared by all gauges.

use thiserror::Error;

use std::{collections::HashMap, fmt};

/// Name of the label identifying the reported component. Always present in a [`LabelSet`].
pub const COMPONENT_LABEL: &str = "component";

const fn is_valid_name_char(ch: char) -> bool {
    ch == '_' || ch == ':' || ch.is_ascii_alphabetic()
}

/// Escapes a label or metric name so that it only contains `[A-Za-z_:]` chars. Each disallowed char
/// is replaced with `_`; an empty name is escaped to `_`.
///
/// Escaping is idempotent.
pub fn escape_name(name: &str) -> String {
    if name.is_empty() {
        return "_".to_owned();
    }
    name.chars()
        .map(|ch| if is_valid_name_char(ch) { ch } else { '_' })
        .collect()
}

/// Concrete label values for a component, ordered by label name.
pub type LabelValues = Vec<(String, String)>;

/// Error returned by [`LabelSet::resolve()`] if some labels have no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("labels {missing:?} have no values")]
pub struct MissingLabels {
    /// Names of labels without values.
    pub missing: Vec<String>,
}

/// Fixed, sorted set of variable label names carried by every registered gauge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    names: Vec<String>,
}

impl LabelSet {
    /// Creates a label set from the configured tag label names. Names are escaped,
    /// [`COMPONENT_LABEL`] is added, and the result is sorted and deduplicated.
    pub fn new<I>(tag_label_names: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut names: Vec<_> = tag_label_names
            .into_iter()
            .map(|name| escape_name(name.as_ref()))
            .chain([COMPONENT_LABEL.to_owned()])
            .collect();
        names.sort_unstable();
        names.dedup();
        Self { names }
    }

    /// Returns label names in the sorted order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the number of labels.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always returns `false` since the component label is always present.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Checks whether this set contains the specified label name.
    pub fn contains(&self, name: &str) -> bool {
        self.names
            .binary_search_by(|probe| probe.as_str().cmp(name))
            .is_ok()
    }

    /// Resolves label values for a component.
    ///
    /// The component label is set to `component`. If `fill_empty` is set, missing labels get
    /// an empty value. Labels not in this set are discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if some labels in this set end up without a value.
    pub fn resolve(
        &self,
        component: &str,
        mut labels: HashMap<String, String>,
        fill_empty: bool,
    ) -> Result<LabelValues, MissingLabels> {
        labels.insert(COMPONENT_LABEL.to_owned(), component.to_owned());

        let mut values = Vec::with_capacity(self.names.len());
        let mut missing = vec![];
        for name in &self.names {
            match labels.remove(name) {
                Some(value) => values.push((name.clone(), value)),
                None if fill_empty => values.push((name.clone(), String::new())),
                None => missing.push(name.clone()),
            }
        }

        if missing.is_empty() {
            Ok(values)
        } else {
            Err(MissingLabels { missing })
        }
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "[{}]", self.names.join(", "))
    }
}

/// Converts component tags in the `key<separator>value` form to labels.
#[derive(Debug, Clone)]
pub struct TagDecoder {
    separator: String,
    label_set: LabelSet,
}

impl TagDecoder {
    /// Creates a decoder. Only tags with keys recognized by `label_set` produce labels.
    /// An empty `separator` disables decoding.
    pub fn new(separator: impl Into<String>, label_set: LabelSet) -> Self {
        Self {
            separator: separator.into(),
            label_set,
        }
    }

    /// Decodes a single tag into an escaped label name and a value.
    pub fn decode_tag<'a>(&self, tag: &'a str) -> Option<(String, &'a str)> {
        if self.separator.is_empty() {
            return None;
        }
        let (name, value) = tag.split_once(self.separator.as_str())?;
        let name = escape_name(name);
        self.label_set.contains(&name).then_some((name, value))
    }

    /// Decodes all tags of a component. If several tags map to the same label, the last one wins.
    pub fn decode<S: AsRef<str>>(&self, tags: &[S]) -> HashMap<String, String> {
        tags.iter()
            .filter_map(|tag| self.decode_tag(tag.as_ref()))
            .map(|(name, value)| (name, value.to_owned()))
            .collect()
    }
}
