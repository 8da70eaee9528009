//! Field name -> `Field` mapping, plus glob-pattern dynamic fields.

pub mod field;

pub use field::{Field, FieldValue, TermPosting};

use crate::Error;
use crate::HashMap;
use std::collections::BTreeMap;

/// A compiled `*`/`?` glob, matched Unix-`fnmatch`-style.
#[derive(Debug, Clone)]
struct Glob {
    pattern: String,
}

impl Glob {
    fn matches(&self, name: &str) -> bool {
        glob_match(self.pattern.as_bytes(), name.as_bytes())
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(&p), Some(&t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

fn is_dynamic(name: &str) -> bool {
    name.contains('*') || name.contains('?')
}

fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::FieldConfiguration("field name must not be empty".into()));
    }
    if name.starts_with('_') {
        return Err(Error::FieldConfiguration(format!(
            "field name {:?} must not start with '_'",
            name
        )));
    }
    if name.contains(' ') {
        return Err(Error::FieldConfiguration(format!(
            "field name {:?} must not contain spaces",
            name
        )));
    }
    Ok(())
}

#[derive(Default, Clone, Serialize, Deserialize)]
pub struct Schema {
    static_fields: BTreeMap<String, Field>,
    dynamic_fields: Vec<(String, Field)>,
    /// parent field name -> names of fields it generated (e.g. a spelling companion).
    subfields_of: HashMap<String, Vec<String>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, field: Field) -> Result<(), Error> {
        validate_name(name)?;
        if self.static_fields.contains_key(name) || self.dynamic_fields.iter().any(|(n, _)| n == name) {
            return Err(Error::FieldConfiguration(format!("duplicate field {:?}", name)));
        }
        if is_dynamic(name) {
            self.dynamic_fields.push((name.to_string(), field));
        } else {
            self.static_fields.insert(name.to_string(), field);
        }
        Ok(())
    }

    pub fn add_subfield(&mut self, parent: &str, name: &str, field: Field) -> Result<(), Error> {
        self.add(name, field)?;
        self.subfields_of.entry(parent.to_string()).or_default().push(name.to_string());
        Ok(())
    }

    pub fn remove(&mut self, name: &str) {
        self.static_fields.remove(name);
        self.dynamic_fields.retain(|(n, _)| n != name);
    }

    /// Static lookup first; on miss, first matching dynamic pattern in
    /// insertion order wins.
    pub fn get(&self, name: &str) -> Option<&Field> {
        if let Some(f) = self.static_fields.get(name) {
            return Some(f);
        }
        for (pattern, field) in &self.dynamic_fields {
            if Glob { pattern: pattern.clone() }.matches(name) {
                return Some(field);
            }
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn subfields(&self, parent: &str) -> &[String] {
        self.subfields_of.get(parent).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Every declared field name, static and dynamic (dynamic ones by their
    /// glob pattern, e.g. `"attr_*"`, not any concrete name they may match).
    /// Used to hand out a stable id to every declared field, pattern included.
    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.static_fields.keys().chain(self.dynamic_fields.iter().map(|(name, _)| name))
    }

    /// If `name` isn't itself a static field but matches one of the schema's
    /// dynamic glob patterns, the pattern that matched (in insertion order,
    /// same precedence as [`get`](Self::get)). Lets a concrete field name
    /// like `"attr_color"` share the id assigned to its declaring pattern.
    pub fn dynamic_pattern_for(&self, name: &str) -> Option<&str> {
        if self.static_fields.contains_key(name) {
            return None;
        }
        self.dynamic_fields
            .iter()
            .find(|(pattern, _)| Glob { pattern: pattern.clone() }.matches(name))
            .map(|(pattern, _)| pattern.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_lookup_roundtrip() {
        let mut schema = Schema::new();
        schema.add("title", Field::text(false)).unwrap();
        assert!(schema.contains("title"));
        assert!(!schema.contains("missing"));
    }

    #[test]
    fn rejects_bad_names() {
        let mut schema = Schema::new();
        assert!(schema.add("_hidden", Field::id()).is_err());
        assert!(schema.add("has space", Field::id()).is_err());
        assert!(schema.add("", Field::id()).is_err());
    }

    #[test]
    fn rejects_duplicates() {
        let mut schema = Schema::new();
        schema.add("title", Field::text(false)).unwrap();
        assert!(schema.add("title", Field::text(false)).is_err());
    }

    #[test]
    fn dynamic_fields_match_by_glob() {
        let mut schema = Schema::new();
        schema.add("attr_*", Field::keyword()).unwrap();
        assert!(schema.contains("attr_color"));
        assert!(!schema.contains("other"));
    }

    #[test]
    fn static_names_take_priority_over_dynamic() {
        let mut schema = Schema::new();
        schema.add("attr_*", Field::keyword()).unwrap();
        schema.add("attr_special", Field::id()).unwrap();
        assert!(matches!(schema.get("attr_special"), Some(Field::Id { .. })));
    }

    #[test]
    fn dynamic_pattern_for_resolves_concrete_names() {
        let mut schema = Schema::new();
        schema.add("title", Field::text(false)).unwrap();
        schema.add("attr_*", Field::keyword()).unwrap();
        assert_eq!(schema.dynamic_pattern_for("attr_color"), Some("attr_*"));
        assert_eq!(schema.dynamic_pattern_for("title"), None);
        assert_eq!(schema.dynamic_pattern_for("nope"), None);
    }

    #[test]
    fn field_names_includes_dynamic_patterns() {
        let mut schema = Schema::new();
        schema.add("title", Field::text(false)).unwrap();
        schema.add("attr_*", Field::keyword()).unwrap();
        let names: Vec<&String> = schema.field_names().collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().any(|n| n.as_str() == "title"));
        assert!(names.iter().any(|n| n.as_str() == "attr_*"));
    }

    #[test]
    fn dynamic_fields_survive_json_round_trip() {
        let mut schema = Schema::new();
        schema.add("title", Field::text(false)).unwrap();
        schema.add("attr_*", Field::keyword()).unwrap();

        let json = serde_json::to_string(&schema).unwrap();
        let reloaded: Schema = serde_json::from_str(&json).unwrap();

        assert!(reloaded.contains("attr_anything"));
        assert_eq!(reloaded.dynamic_pattern_for("attr_anything"), Some("attr_*"));
        assert_eq!(reloaded.field_names().count(), 2);
    }
}
