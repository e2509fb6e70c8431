use serde_json::Value;
use std::collections::HashMap;

/// One multi-entity item extracted from a single document, tagged with the
/// source URL it came from, to track sources per-item before
/// deduplication.
#[derive(Debug, Clone)]
pub struct SourcedItem {
    pub value: Value,
    pub source: String,
}

/// The result of merging multi-entity items across documents: the
/// deduplicated array plus a `sources[key]` map of which URLs contributed
/// to each surviving item, keyed by its identity key value.
#[derive(Debug, Clone, Default)]
pub struct MergedEntities {
    pub items: Vec<Value>,
    pub sources: HashMap<String, Vec<String>>,
}

/// Implements the mergeability rule: two items are mergeable if
/// they match on an identity field (default `name`/`title`-shaped key);
/// a merged item adopts the union of non-null values from its duplicates,
/// and its sources are the union of the source URLs that produced it.
pub struct MultiEntityMerger {
    identity_fields: Vec<String>,
}

impl MultiEntityMerger {
    pub fn new(identity_fields: Vec<String>) -> Self {
        let identity_fields = if identity_fields.is_empty() {
            vec!["id".to_string(), "name".to_string(), "title".to_string()]
        } else {
            identity_fields
        };
        Self { identity_fields }
    }

    pub fn merge(&self, items: Vec<SourcedItem>) -> MergedEntities {
        let mut merged: Vec<Value> = Vec::new();
        let mut keys: Vec<String> = Vec::new();
        let mut sources: HashMap<String, Vec<String>> = HashMap::new();

        for item in items {
            let key = self.identity_key(&item.value);

            let existing = key
                .as_ref()
                .and_then(|key| keys.iter().position(|k| k == key));

            match existing {
                Some(index) => {
                    Self::union_non_null(&mut merged[index], &item.value);
                    if let Some(key) = &key {
                        sources.entry(key.clone()).or_default().push(item.source);
                    }
                }
                None => {
                    let entry_key = key.unwrap_or_else(|| format!("__unkeyed_{}", merged.len()));
                    sources.entry(entry_key.clone()).or_default().push(item.source);
                    keys.push(entry_key);
                    merged.push(item.value);
                }
            }
        }

        for source_list in sources.values_mut() {
            source_list.sort();
            source_list.dedup();
        }

        MergedEntities { items: merged, sources }
    }

    fn identity_key(&self, value: &Value) -> Option<String> {
        let obj = value.as_object()?;
        for field in &self.identity_fields {
            if let Some(v) = obj.get(field) {
                if !v.is_null() {
                    return Some(format!("{field}:{v}"));
                }
            }
        }
        None
    }

    fn union_non_null(target: &mut Value, other: &Value) {
        let (Some(target_obj), Some(other_obj)) = (target.as_object_mut(), other.as_object()) else {
            return;
        };
        for (key, value) in other_obj {
            if value.is_null() {
                continue;
            }
            match target_obj.get(key) {
                None | Some(Value::Null) => {
                    target_obj.insert(key.clone(), value.clone());
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merges_items_sharing_an_identity_field() {
        let merger = MultiEntityMerger::new(vec!["name".to_string()]);
        let items = vec![
            SourcedItem {
                value: json!({"name": "Widget", "price": null}),
                source: "https://a.test/1".to_string(),
            },
            SourcedItem {
                value: json!({"name": "Widget", "price": 9.99}),
                source: "https://a.test/2".to_string(),
            },
        ];

        let merged = merger.merge(items);
        assert_eq!(merged.items.len(), 1);
        assert_eq!(merged.items[0]["price"], 9.99);
        assert_eq!(merged.sources.len(), 1);
        let sources = merged.sources.values().next().unwrap();
        assert_eq!(sources, &vec!["https://a.test/1".to_string(), "https://a.test/2".to_string()]);
    }

    #[test]
    fn distinct_identities_are_not_merged() {
        let merger = MultiEntityMerger::new(vec!["name".to_string()]);
        let items = vec![
            SourcedItem { value: json!({"name": "Widget"}), source: "https://a.test/1".to_string() },
            SourcedItem { value: json!({"name": "Gadget"}), source: "https://a.test/2".to_string() },
        ];

        let merged = merger.merge(items);
        assert_eq!(merged.items.len(), 2);
    }

    #[test]
    fn unkeyed_items_are_kept_distinct() {
        let merger = MultiEntityMerger::new(vec!["name".to_string()]);
        let items = vec![
            SourcedItem { value: json!({"price": 1}), source: "https://a.test/1".to_string() },
            SourcedItem { value: json!({"price": 2}), source: "https://a.test/2".to_string() },
        ];

        let merged = merger.merge(items);
        assert_eq!(merged.items.len(), 2);
    }
}
