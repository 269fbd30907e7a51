use serde::{Deserialize, Serialize};

/// Tool definition sent to the model as part of every request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the arguments.
    pub parameters: serde_json::Value,
}

/// Outcome of one tool execution as seen by the agent loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub name: String,
    pub passed: bool,
    /// Raw, untruncated output.
    pub output: String,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn definition_serializes_schema_verbatim() {
        let def = ToolDefinition::new(
            "read_file",
            "Read a file",
            json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
        );
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["name"], "read_file");
        assert_eq!(value["parameters"]["required"][0], "path");
    }
}
