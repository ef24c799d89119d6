//! Model hydration: wraps plain `fetch` results in a caller-registered type
//! when the fetched URI falls under a registered prefix.

use serde_json::Value;

/// The JSON type a [`FieldSchema`] expects a field's value to hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    /// A JSON string.
    String,
    /// A JSON number.
    Number,
    /// A JSON boolean.
    Bool,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// A single declared field in a [`ModelFactory`]'s schema, consulted by
/// [`crate::db::Db::validate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSchema {
    /// The field's key within the document's top-level object.
    pub name: String,
    /// The type the field's value is expected to hold.
    pub expected: FieldType,
}

impl FieldSchema {
    /// Builds a field declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, expected: FieldType) -> Self {
        Self {
            name: name.into(),
            expected,
        }
    }
}

/// A hydration factory registered against a URI prefix via
/// [`crate::db::Db::model`].
///
/// The source specification calls `Model.from(data)` when the model
/// defines it, else falls back to `new Model(data)`; the Rust equivalent is
/// a single trait method implementors define however suits their type.
pub trait ModelFactory: Send + Sync {
    /// Wraps `data` into this model's representation. Only ever called for
    /// object-shaped `data` (arrays and scalars pass through unhydrated).
    fn hydrate(&self, data: Value) -> Value;

    /// The fields this model declares, consulted by `validate` to report
    /// per-field type mismatches. Missing fields are not errors; an empty
    /// schema (the default) means `validate` only checks object-shape.
    fn schema(&self) -> &[FieldSchema] {
        &[]
    }
}

/// A [`ModelFactory`] built from a plain function, for callers that don't
/// need a dedicated type.
pub struct FnModel<F>(pub F)
where
    F: Fn(Value) -> Value + Send + Sync;

impl<F> ModelFactory for FnModel<F>
where
    F: Fn(Value) -> Value + Send + Sync,
{
    fn hydrate(&self, data: Value) -> Value {
        (self.0)(data)
    }
}

/// A prefix-registered set of [`ModelFactory`]s; `find` performs
/// longest-prefix matching.
#[derive(Default)]
pub struct ModelRegistry {
    entries: Vec<(String, Box<dyn ModelFactory>)>,
}

impl ModelRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for every URI under `prefix`.
    pub fn register(&mut self, prefix: impl Into<String>, factory: Box<dyn ModelFactory>) {
        self.entries.push((prefix.into(), factory));
    }

    /// Returns the longest-prefix-matching factory for `uri`, if any.
    #[must_use]
    pub fn find(&self, uri: &str) -> Option<&dyn ModelFactory> {
        self.entries
            .iter()
            .filter(|(prefix, _)| uri.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, factory)| factory.as_ref())
    }

    /// Hydrates `data` through the matching model for `uri`, if any and if
    /// `data` is object-shaped; otherwise returns `data` unchanged.
    #[must_use]
    pub fn hydrate(&self, uri: &str, data: Value) -> Value {
        if !data.is_object() {
            return data;
        }
        match self.find(uri) {
            Some(factory) => factory.hydrate(data),
            None => data,
        }
    }

    /// Checks `data`'s top-level fields against the schema declared by the
    /// model registered for `uri`, if any. Returns one `(field, message)`
    /// pair per type mismatch; fields the schema declares but `data` lacks
    /// are not reported.
    #[must_use]
    pub fn validate_fields(&self, uri: &str, data: &Value) -> Vec<(String, String)> {
        let Some(factory) = self.find(uri) else {
            return Vec::new();
        };
        let Value::Object(map) = data else {
            return Vec::new();
        };
        factory
            .schema()
            .iter()
            .filter_map(|field| {
                let value = map.get(&field.name)?;
                if field.expected.matches(value) {
                    None
                } else {
                    Some((
                        field.name.clone(),
                        format!("expected {}, got {}", field.expected.name(), type_name(value)),
                    ))
                }
            })
            .collect()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hydrate_applies_longest_matching_prefix() {
        let mut registry = ModelRegistry::new();
        registry.register(
            "/a",
            Box::new(FnModel(|mut data: Value| {
                if let Value::Object(ref mut map) = data {
                    map.insert("tag".to_owned(), json!("outer"));
                }
                data
            })),
        );
        registry.register(
            "/a/b",
            Box::new(FnModel(|mut data: Value| {
                if let Value::Object(ref mut map) = data {
                    map.insert("tag".to_owned(), json!("inner"));
                }
                data
            })),
        );
        let result = registry.hydrate("/a/b/c", json!({}));
        assert_eq!(result, json!({"tag": "inner"}));
    }

    #[test]
    fn hydrate_passes_through_non_objects() {
        let mut registry = ModelRegistry::new();
        registry.register("/a", Box::new(FnModel(|_data| json!({"tag": "x"}))));
        assert_eq!(registry.hydrate("/a/b", json!([1, 2])), json!([1, 2]));
    }

    #[test]
    fn hydrate_is_noop_without_matching_model() {
        let registry = ModelRegistry::new();
        assert_eq!(registry.hydrate("/a", json!({"x": 1})), json!({"x": 1}));
    }

    struct UserModel;

    impl ModelFactory for UserModel {
        fn hydrate(&self, data: Value) -> Value {
            data
        }

        fn schema(&self) -> &[FieldSchema] {
            static FIELDS: std::sync::OnceLock<Vec<FieldSchema>> = std::sync::OnceLock::new();
            FIELDS.get_or_init(|| {
                vec![
                    FieldSchema::new("name", FieldType::String),
                    FieldSchema::new("age", FieldType::Number),
                ]
            })
        }
    }

    #[test]
    fn validate_fields_reports_type_mismatches_only() {
        let mut registry = ModelRegistry::new();
        registry.register("/users", Box::new(UserModel));
        let issues = registry.validate_fields("/users/1", &json!({"name": "Ada", "age": "old"}));
        assert_eq!(issues, vec![("age".to_owned(), "expected number, got string".to_owned())]);
    }

    #[test]
    fn validate_fields_ignores_missing_declared_fields() {
        let mut registry = ModelRegistry::new();
        registry.register("/users", Box::new(UserModel));
        let issues = registry.validate_fields("/users/1", &json!({"name": "Ada"}));
        assert!(issues.is_empty());
    }

    #[test]
    fn validate_fields_empty_without_matching_model() {
        let registry = ModelRegistry::new();
        let issues = registry.validate_fields("/users/1", &json!({"age": "old"}));
        assert!(issues.is_empty());
    }
}
