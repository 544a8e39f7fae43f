//! Flag definition files.
//!
//! A definition file is a YAML or JSON document holding a list of flags:
//!
//! ```yaml
//! version: 1
//! flags:
//!   - key: beta-feature
//!     type: boolean
//!     default_value: false
//!     rules:
//!       - id: beta-users
//!         conditions:
//!           - { property: subject_id, operator: equals, value: U1 }
//!         value: true
//! ```

use crate::error::{Error, Result};
use crate::flag::Flag;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Current definition file format version.
pub const FORMAT_VERSION: u32 = 1;

const fn default_version() -> u32 {
    FORMAT_VERSION
}

/// A validated set of flag definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FlagFile {
    /// File format version.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Flag definitions.
    #[serde(default)]
    pub flags: Vec<Flag>,
}

impl Default for FlagFile {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl FlagFile {
    /// Creates a file for the given flags.
    #[must_use]
    pub const fn new(flags: Vec<Flag>) -> Self {
        Self {
            version: FORMAT_VERSION,
            flags,
        }
    }

    /// Parses and validates a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or any flag is invalid.
    pub fn parse_yaml(input: &str) -> Result<Self> {
        let file: Self = serde_yaml::from_str(input)?;
        file.validate()?;
        Ok(file)
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or any flag is invalid.
    pub fn parse_json(input: &str) -> Result<Self> {
        let file: Self = serde_json::from_str(input)?;
        file.validate()?;
        Ok(file)
    }

    /// Loads a definition file, choosing the format by extension.
    ///
    /// `.json` files are read as JSON; anything else as YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let file = if is_json {
            Self::parse_json(&content)?
        } else {
            Self::parse_yaml(&content)?
        };
        debug!(
            "Loaded {} flag(s) from {}",
            file.flags.len(),
            path.display()
        );
        Ok(file)
    }

    /// Checks the format version, key uniqueness and every flag's invariants.
    ///
    /// # Errors
    ///
    /// Returns the first problem found, naming the offending flag.
    pub fn validate(&self) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(Error::InvalidFile {
                reason: format!(
                    "unsupported version {} (expected {FORMAT_VERSION})",
                    self.version
                ),
            });
        }

        let mut seen = HashSet::new();
        for flag in &self.flags {
            if !seen.insert(flag.key.as_str()) {
                return Err(Error::InvalidFile {
                    reason: format!("duplicate flag key '{}'", flag.key),
                });
            }
            flag.validate()?;
        }
        Ok(())
    }

    /// Serializes to YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Serializes to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns the JSON Schema describing the file format.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be serialized.
    pub fn json_schema() -> Result<serde_json::Value> {
        let schema = schemars::schema_for!(FlagFile);
        Ok(serde_json::to_value(schema)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::{Operator, RolloutStrategy};
    use crate::value::{FlagType, FlagValue};

    const SAMPLE: &str = r#"
version: 1
flags:
  - key: beta-feature
    name: Beta feature
    type: boolean
    default_value: false
    rules:
      - id: beta-users
        priority: 10
        conditions:
          - property: subject_id
            operator: equals
            value: U1
        value: true
    rollout_strategy:
      type: percentage
      percentage: 25
  - key: service-config
    type: json
    default_value:
      rate_limit: 100
      timeout_ms: 5000
"#;

    #[test]
    fn parses_yaml_definitions() {
        let file = FlagFile::parse_yaml(SAMPLE).unwrap();
        assert_eq!(file.flags.len(), 2);

        let beta = &file.flags[0];
        assert_eq!(beta.flag_type, FlagType::Boolean);
        assert!(beta.enabled);
        assert_eq!(beta.rules[0].conditions[0].operator, Operator::Equals);
        assert_eq!(
            beta.rollout_strategy,
            Some(RolloutStrategy::Percentage {
                percentage: 25.0,
                sticky: true
            })
        );

        let config = &file.flags[1];
        assert_eq!(
            config.default_value,
            FlagValue::Json(serde_json::json!({"rate_limit": 100, "timeout_ms": 5000}))
        );
    }

    #[test]
    fn rejects_duplicate_keys() {
        let input = r#"
flags:
  - { key: a, type: boolean, default_value: true }
  - { key: a, type: boolean, default_value: false }
"#;
        let err = FlagFile::parse_yaml(input).unwrap_err();
        assert!(err.to_string().contains("duplicate flag key 'a'"));
    }

    #[test]
    fn rejects_unknown_operator() {
        let input = r#"
flags:
  - key: a
    type: boolean
    default_value: false
    rules:
      - id: r
        conditions: [{ property: plan, operator: matches, value: pro }]
        value: true
"#;
        assert!(matches!(FlagFile::parse_yaml(input), Err(Error::Yaml(_))));
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = FlagFile::parse_json(r#"{"version":2,"flags":[]}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidFile { .. }));
    }

    #[test]
    fn yaml_output_parses_back() {
        let file = FlagFile::parse_yaml(SAMPLE).unwrap();
        let yaml = file.to_yaml().unwrap();
        assert_eq!(FlagFile::parse_yaml(&yaml).unwrap(), file);
    }

    #[test]
    fn schema_describes_flags() {
        let schema = FlagFile::json_schema().unwrap();
        assert!(schema["definitions"]["Flag"].is_object());
        assert!(schema["definitions"]["Operator"].is_object());
    }

    #[test]
    fn bundled_definitions_are_valid() {
        let file = FlagFile::parse_yaml(include_str!("../../../flags.yaml")).unwrap();
        let keys: Vec<&str> = file.flags.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(
            keys,
            [
                "beta-feature",
                "checkout-v2",
                "search-v2",
                "button-color",
                "holiday-banner",
                "service-config"
            ]
        );
        let banner = file.flags[4].schedule.as_ref().unwrap();
        assert_eq!(banner.days_of_week.len(), 2);
    }
}
