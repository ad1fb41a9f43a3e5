use serde_json::{json, Value};

/// Primitive field types accepted in a declared output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
}

impl FieldType {
    fn json_name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
        }
    }
}

/// A declared reply shape: field names mapped to primitive types.
/// Rendered to the gateway's strict json_schema response format.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: String,
    pub fields: Vec<(String, FieldType)>,
}

impl OutputSchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, ty: FieldType) -> Self {
        self.fields.push((name.to_string(), ty));
        self
    }

    pub fn to_response_format(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for (name, ty) in &self.fields {
            properties.insert(name.clone(), json!({ "type": ty.json_name() }));
            required.push(Value::String(name.clone()));
        }

        json!({
            "type": "json_schema",
            "json_schema": {
                "name": self.name,
                "strict": true,
                "schema": {
                    "type": "object",
                    "properties": Value::Object(properties),
                    "required": required,
                    "additionalProperties": false
                }
            }
        })
    }

    /// Check a parsed reply against the declared fields.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "reply is not a JSON object".to_string())?;

        for (name, ty) in &self.fields {
            let field = obj
                .get(name)
                .ok_or_else(|| format!("missing field `{name}`"))?;

            let ok = match ty {
                FieldType::String => field.is_string(),
                FieldType::Number => field.is_number(),
                FieldType::Integer => field.is_i64() || field.is_u64(),
                FieldType::Boolean => field.is_boolean(),
            };

            if !ok {
                return Err(format!(
                    "field `{name}` is not a {}",
                    ty.json_name()
                ));
            }
        }

        Ok(())
    }
}

/// A callable tool declared to the gateway.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn to_value(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}
