use serde::{Deserialize, Serialize};

use crate::KeyValue;

/// Ordered list of task properties.
///
/// Serialized as a plain array of key–value pairs.
/// Lookups scan from the end, so a later entry overrides an earlier one with the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskProperties(Vec<KeyValue>);

impl TaskProperties {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter()
    }

    /// Value of the last entry with the given key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|kv| kv.key() == key)
            .map(|kv| kv.value())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push(KeyValue::new(key, value));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Layer `other` on top of `self`; entries of `other` win.
    ///
    /// Duplicate keys are collapsed so the merged list holds one entry per key,
    /// in first-seen order.
    pub fn merged(&self, other: &TaskProperties) -> TaskProperties {
        let mut out: Vec<KeyValue> = Vec::with_capacity(self.len() + other.len());
        for kv in self.0.iter().chain(other.0.iter()) {
            match out.iter_mut().find(|e| e.key() == kv.key()) {
                Some(slot) => *slot = kv.clone(),
                None => out.push(kv.clone()),
            }
        }
        TaskProperties(out)
    }
}

impl FromIterator<(String, String)> for TaskProperties {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| KeyValue::new(k, v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::TaskProperties;

    #[test]
    fn later_entry_overrides_earlier() {
        let mut props = TaskProperties::new();
        props.push("runs", "1");
        props.push("mode", "fast");
        props.push("runs", "5");

        assert_eq!(props.get("runs"), Some("5"));
        assert_eq!(props.get("mode"), Some("fast"));
        assert!(props.get("missing").is_none());
    }

    #[test]
    fn merged_layers_other_on_top_and_dedups() {
        let base = TaskProperties::new().with("runs", "1").with("host", "any");
        let top = TaskProperties::new().with("runs", "10").with("seed", "42");

        let merged = base.merged(&top);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get("runs"), Some("10"));
        assert_eq!(merged.get("host"), Some("any"));
        assert_eq!(merged.get("seed"), Some("42"));
    }

    #[test]
    fn serializes_as_array() {
        let props = TaskProperties::new().with("k", "v");
        let json = serde_json::to_string(&props).unwrap();
        assert_eq!(json, r#"[{"key":"k","value":"v"}]"#);
    }
}
