use serde_json::Value;
use shared::AppError;

/// A hand-rolled, typed tagged-variant tree compiled once per extract
/// request from the caller's `serde_json::Value` JSON Schema, rather than
/// pulling in a full runtime JSON Schema validator crate. Only the
/// constructs this service actually needs are supported; unsupported
/// constructs (`default`, `pattern`, `format`, numeric
/// `minimum`/`maximum`) are rejected up front so an unsupported schema
/// fails the request immediately instead of
/// silently ignoring constraints later.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    String,
    Number,
    Boolean,
    Object {
        properties: Vec<(String, SchemaNode)>,
        required: Vec<String>,
    },
    Array {
        items: Box<SchemaNode>,
    },
}

const UNSUPPORTED_KEYWORDS: [&str; 4] = ["default", "pattern", "format", "minimum"];

impl SchemaNode {
    pub fn compile(value: &Value) -> Result<Self, AppError> {
        let obj = value
            .as_object()
            .ok_or_else(|| AppError::BadRequest("schema node must be a JSON object".to_string()))?;

        for keyword in UNSUPPORTED_KEYWORDS {
            if obj.contains_key(keyword) {
                return Err(AppError::BadRequest(format!(
                    "unsupported schema keyword '{keyword}'"
                )));
            }
        }
        if obj.contains_key("maximum") {
            return Err(AppError::BadRequest("unsupported schema keyword 'maximum'".to_string()));
        }

        let ty = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::BadRequest("schema node missing 'type'".to_string()))?;

        match ty {
            "string" => Ok(SchemaNode::String),
            "number" | "integer" => Ok(SchemaNode::Number),
            "boolean" => Ok(SchemaNode::Boolean),
            "array" => {
                let items = obj
                    .get("items")
                    .ok_or_else(|| AppError::BadRequest("array schema missing 'items'".to_string()))?;
                Ok(SchemaNode::Array {
                    items: Box::new(SchemaNode::compile(items)?),
                })
            }
            "object" => {
                let props_value = obj.get("properties").and_then(Value::as_object);
                let mut properties = Vec::new();
                if let Some(props_value) = props_value {
                    for (key, node) in props_value {
                        properties.push((key.clone(), SchemaNode::compile(node)?));
                    }
                }
                let required = obj
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(SchemaNode::Object { properties, required })
            }
            other => Err(AppError::BadRequest(format!("unsupported schema type '{other}'"))),
        }
    }

    /// The top-level object properties whose type is `array`: candidates
    /// the (opaque) LLM classification step chooses among when deciding
    /// `multi_entity_keys`.
    pub fn multi_entity_candidates(&self) -> Vec<String> {
        match self {
            SchemaNode::Object { properties, .. } => properties
                .iter()
                .filter(|(_, node)| matches!(node, SchemaNode::Array { .. }))
                .map(|(name, _)| name.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Splits this schema into a single-answer schema (everything except
    /// `multi_entity_keys`) and, if any keys were split out, a side-schema
    /// covering just those array properties.
    pub fn split_multi_entity(&self, multi_entity_keys: &[String]) -> (SchemaNode, Option<SchemaNode>) {
        let SchemaNode::Object { properties, required } = self else {
            return (self.clone(), None);
        };

        let (multi, single): (Vec<_>, Vec<_>) = properties
            .iter()
            .cloned()
            .partition(|(name, _)| multi_entity_keys.contains(name));

        let single_schema = SchemaNode::Object {
            properties: single,
            required: required.iter().filter(|r| !multi_entity_keys.contains(r)).cloned().collect(),
        };

        if multi.is_empty() {
            return (single_schema, None);
        }

        let multi_schema = SchemaNode::Object {
            required: required.iter().filter(|r| multi_entity_keys.contains(r)).cloned().collect(),
            properties: multi,
        };

        (single_schema, Some(multi_schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compiles_nested_object_and_array_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "products": {"type": "array", "items": {"type": "string"}},
            },
            "required": ["title"],
        });
        let node = SchemaNode::compile(&schema).unwrap();
        assert_eq!(node.multi_entity_candidates(), vec!["products".to_string()]);
    }

    #[test]
    fn rejects_pattern_keyword() {
        let schema = json!({"type": "string", "pattern": "^[a-z]+$"});
        let err = SchemaNode::compile(&schema).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn rejects_numeric_minimum_and_maximum() {
        assert!(SchemaNode::compile(&json!({"type": "number", "minimum": 0})).is_err());
        assert!(SchemaNode::compile(&json!({"type": "number", "maximum": 100})).is_err());
    }

    #[test]
    fn splits_multi_entity_keys_into_side_schema() {
        let schema = SchemaNode::compile(&json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "products": {"type": "array", "items": {"type": "string"}},
            },
        }))
        .unwrap();

        let (single, multi) = schema.split_multi_entity(&["products".to_string()]);
        let SchemaNode::Object { properties, .. } = &single else { panic!("expected object") };
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0].0, "summary");

        let multi = multi.unwrap();
        let SchemaNode::Object { properties, .. } = &multi else { panic!("expected object") };
        assert_eq!(properties[0].0, "products");
    }
}
