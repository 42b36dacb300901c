use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::patterns::compile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Int,
    Float,
    #[serde(rename = "datetime")]
    DateTime,
    Tags,
}

impl PropertyType {
    /// The type implied by a property name suffix such as `_int`.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "int" => Some(Self::Int),
            "num" => Some(Self::Float),
            "date" => Some(Self::DateTime),
            "tag" => Some(Self::Tags),
            "url" => Some(Self::String),
            _ => None,
        }
    }

    /// The conventional suffix for a suggested property of this type.
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Int => Some("int"),
            Self::Float => Some("num"),
            Self::DateTime => Some("date"),
            Self::Tags => Some("tag"),
            Self::String => None,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::DateTime => "datetime",
            Self::Tags => "tags",
        })
    }
}

/// Built-in article properties and their types.
pub const BUILTIN_PROPERTIES: [(&str, PropertyType); 10] = [
    ("title", PropertyType::String),
    ("text", PropertyType::String),
    ("date", PropertyType::DateTime),
    ("url", PropertyType::String),
    ("medium", PropertyType::String),
    ("section", PropertyType::String),
    ("byline", PropertyType::String),
    ("author", PropertyType::String),
    ("length", PropertyType::Int),
    ("page", PropertyType::Int),
];

/// Properties every article must carry.
pub const REQUIRED_PROPERTIES: [&str; 3] = ["title", "text", "date"];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_PROPERTIES.iter().any(|(n, _)| *n == name)
}

static PROPERTY_NAME: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^([A-Za-z][A-Za-z0-9]*)(?:_([a-z]+))?$"));

/// Split a property name into its base and optional type suffix.
///
/// Returns `None` for names that are not a letter followed by
/// alphanumerics, optionally followed by one known `_suffix`.
pub fn parse_property_name(name: &str) -> Option<(&str, Option<PropertyType>)> {
    let caps = PROPERTY_NAME.captures(name)?;
    let base = caps.get(1)?.as_str();
    match caps.get(2) {
        None => Some((base, None)),
        Some(suffix) => PropertyType::from_suffix(suffix.as_str()).map(|t| (base, Some(t))),
    }
}

/// Turn an arbitrary column label into a valid property name.
///
/// Words after the first character are title-cased and everything that is
/// not alphanumeric is dropped, so `"publication-type"` becomes
/// `"publicationType"`.
pub fn to_valid_field_name(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut chars = label.trim().chars();
    if let Some(first) = chars.next() {
        out.push(first);
    }
    let mut word_start = out.chars().next().is_some_and(|c| !c.is_alphanumeric());
    for c in chars {
        if c.is_alphabetic() {
            if word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            out.push(c);
            word_start = !c.is_alphanumeric();
        }
    }

    let cleaned: String = out.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    match cleaned.chars().next() {
        None => "field".to_string(),
        Some(c) if c.is_ascii_digit() => format!("f{cleaned}"),
        Some(_) => cleaned,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    #[serde(rename = "type")]
    pub ptype: PropertyType,
}

impl Property {
    #[must_use]
    pub fn new(name: impl Into<String>, ptype: PropertyType) -> Self {
        Self {
            name: name.into(),
            ptype,
        }
    }
}

/// The destination properties of a project: the built-ins plus declared
/// extra properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationSchema {
    properties: BTreeMap<String, PropertyType>,
}

impl DestinationSchema {
    /// A schema holding only the built-in properties.
    #[must_use]
    pub fn new() -> Self {
        Self {
            properties: BUILTIN_PROPERTIES
                .iter()
                .map(|(name, ptype)| ((*name).to_string(), *ptype))
                .collect(),
        }
    }

    /// Build a schema from declared extra properties, validating names.
    pub fn with_properties(properties: impl IntoIterator<Item = Property>) -> Result<Self> {
        let mut schema = Self::new();
        for property in properties {
            schema.declare(property)?;
        }
        Ok(schema)
    }

    /// Read a JSON list of extra properties, each `{"name": .., "type": ..}`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let properties: Vec<Property> = serde_json::from_str(&content)?;
        Self::with_properties(properties)
    }

    /// Declare an extra property. Re-declaring a property with its own type
    /// is a no-op; built-ins cannot change type.
    pub fn declare(&mut self, property: Property) -> Result<()> {
        let Some((_, implied)) = parse_property_name(&property.name) else {
            return Err(Error::InvalidPropertyName(property.name));
        };
        if let Some(implied) = implied {
            if implied != property.ptype {
                return Err(Error::SuffixConflict {
                    name: property.name,
                    declared: property.ptype.to_string(),
                    implied: implied.to_string(),
                });
            }
        }
        if let Some(existing) = self.properties.get(&property.name) {
            if *existing != property.ptype {
                return Err(Error::SuffixConflict {
                    implied: existing.to_string(),
                    declared: property.ptype.to_string(),
                    name: property.name,
                });
            }
            return Ok(());
        }
        self.properties.insert(property.name, property.ptype);
        Ok(())
    }

    pub fn property_type(&self, name: &str) -> Option<PropertyType> {
        self.properties.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = Property> + '_ {
        self.properties
            .iter()
            .map(|(name, ptype)| Property::new(name.clone(), *ptype))
    }

    /// Declared properties that are not built-ins.
    pub fn extra_properties(&self) -> impl Iterator<Item = Property> + '_ {
        self.properties().filter(|p| !is_builtin(&p.name))
    }
}

impl Default for DestinationSchema {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_names() {
        assert_eq!(parse_property_name("title"), Some(("title", None)));
        assert_eq!(
            parse_property_name("pagina_int"),
            Some(("pagina", Some(PropertyType::Int)))
        );
        assert_eq!(
            parse_property_name("score_num"),
            Some(("score", Some(PropertyType::Float)))
        );
        assert_eq!(parse_property_name("1st"), None);
        assert_eq!(parse_property_name("two words"), None);
        assert_eq!(parse_property_name("foo_bar"), None);
        assert_eq!(parse_property_name(""), None);
    }

    #[test]
    fn test_to_valid_field_name() {
        assert_eq!(to_valid_field_name("publication-type"), "publicationType");
        assert_eq!(to_valid_field_name("Load Date"), "LoadDate");
        assert_eq!(to_valid_field_name("kop"), "kop");
        assert_eq!(to_valid_field_name("2nd column"), "f2ndColumn");
        assert_eq!(to_valid_field_name("--"), "field");
    }

    #[test]
    fn test_schema_declare() {
        let mut schema = DestinationSchema::new();
        assert_eq!(schema.property_type("date"), Some(PropertyType::DateTime));
        assert!(schema.extra_properties().next().is_none());

        schema.declare(Property::new("pagina_int", PropertyType::Int)).unwrap();
        schema.declare(Property::new("pagina_int", PropertyType::Int)).unwrap();
        assert_eq!(schema.extra_properties().count(), 1);

        assert!(matches!(
            schema.declare(Property::new("pagina_int", PropertyType::String)),
            Err(Error::SuffixConflict { .. })
        ));
        assert!(matches!(
            schema.declare(Property::new("title", PropertyType::Int)),
            Err(Error::SuffixConflict { .. })
        ));
        assert!(matches!(
            schema.declare(Property::new("bad name", PropertyType::String)),
            Err(Error::InvalidPropertyName(_))
        ));
    }

    #[test]
    fn test_load_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, r#"[{"name": "pagina_int", "type": "int"}, {"name": "rubriek", "type": "string"}]"#)
            .unwrap();
        let schema = DestinationSchema::load(&path).unwrap();
        assert_eq!(schema.property_type("pagina_int"), Some(PropertyType::Int));
        assert_eq!(schema.property_type("rubriek"), Some(PropertyType::String));

        std::fs::write(&path, r#"[{"name": "pagina_int", "type": "tags"}]"#).unwrap();
        assert!(matches!(
            DestinationSchema::load(&path),
            Err(Error::SuffixConflict { .. })
        ));
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(DestinationSchema::load(&path), Err(Error::Serialization(_))));
    }
}
