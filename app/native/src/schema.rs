//! JSON schema of the settings file.

use crate::config::MirageConfig;

/// Where the published schema lives.
const SCHEMA_ID: &str = "https://raw.githubusercontent.com/mirage-displays/mirage/main/mirage.schema.json";

/// Generates a JSON Schema for the Mirage settings file.
///
/// The schema includes every option with its type, description and default.
#[must_use]
pub fn generate_schema() -> schemars::Schema {
    let mut schema = schemars::schema_for!(MirageConfig);

    if let Some(obj) = schema.as_object_mut() {
        obj.insert("$id".to_string(), serde_json::json!(SCHEMA_ID));
    }

    schema
}

/// Generates the schema as a pretty-printed JSON string.
#[must_use]
pub fn generate_schema_json() -> String {
    let schema = generate_schema();
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_schema_produces_valid_json() {
        let schema_json = generate_schema_json();
        let parsed: serde_json::Value = serde_json::from_str(&schema_json).unwrap();

        assert!(parsed["$id"].as_str().unwrap().ends_with("mirage.schema.json"));
        assert_eq!(parsed["$schema"], "https://json-schema.org/draft/2020-12/schema");
        assert_eq!(parsed["title"], "MirageConfig");
        assert!(parsed["properties"]["fleet"].is_object());
        assert!(parsed["properties"]["storePath"].is_object());
    }

    #[test]
    fn test_schema_describes_retry_budgets() {
        let schema_json = generate_schema_json();
        assert!(schema_json.contains("cleanRetry"));
        assert!(schema_json.contains("conservativeRetry"));
        assert!(schema_json.contains("terminationTimeoutMs"));
    }
}
