//! 工具参数 JSON Schema：生成与校验
//!
//! 参数结构体 derive `JsonSchema`，由 schemars 生成 schema 注入 reasoner 上下文；
//! 执行前按 schema 做结构校验（类型 / 必填 / 多余字段），再反序列化为强类型参数。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::AgentError;

/// 为参数类型生成 JSON Schema
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

fn violation(tool: &str, reason: impl Into<String>) -> AgentError {
    AgentError::SchemaViolation {
        tool: tool.to_string(),
        reason: reason.into(),
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        _ => true,
    }
}

fn check_type(tool: &str, field: &str, schema: &Value, value: &Value) -> Result<(), AgentError> {
    let ok = match schema.get("type") {
        Some(Value::String(t)) => type_matches(t, value),
        Some(Value::Array(ts)) => ts
            .iter()
            .filter_map(Value::as_str)
            .any(|t| type_matches(t, value)),
        _ => true,
    };
    if !ok {
        return Err(violation(
            tool,
            format!("field '{field}' expected {}, got {}", schema["type"], value),
        ));
    }
    if let (Some(min), Some(n)) = (schema.get("minimum").and_then(Value::as_f64), value.as_f64()) {
        if n < min {
            return Err(violation(tool, format!("field '{field}' below minimum {min}")));
        }
    }
    if let (Some(items), Some(arr)) = (schema.get("items"), value.as_array()) {
        for (i, item) in arr.iter().enumerate() {
            check_type(tool, &format!("{field}[{i}]"), items, item)?;
        }
    }
    Ok(())
}

/// 按 schema 校验参数；只覆盖 schemars 为参数结构体生成的子集（type / required / properties /
/// additionalProperties / minimum / items），$ref 字段交给反序列化兜底
pub fn validate_args(tool: &str, schema: &Value, args: &Value) -> Result<(), AgentError> {
    let obj = args
        .as_object()
        .ok_or_else(|| violation(tool, format!("arguments must be an object, got {}", args)))?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(key) {
                return Err(violation(tool, format!("missing required field '{key}'")));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in obj {
        match properties.and_then(|p| p.get(key)) {
            Some(prop) => check_type(tool, key, prop, value)?,
            None if closed => {
                return Err(violation(tool, format!("unexpected field '{key}'")));
            }
            None => {}
        }
    }
    Ok(())
}

/// 反序列化为强类型参数，失败即 SchemaViolation
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, AgentError> {
    serde_json::from_value(args).map_err(|e| violation(tool, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    #[serde(deny_unknown_fields)]
    struct Args {
        path: String,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        tags: Vec<String>,
    }

    #[test]
    fn test_valid_args_pass() {
        let schema = schema_of::<Args>();
        validate_args("t", &schema, &json!({"path": "a.txt", "limit": 3, "tags": ["x"]})).unwrap();
        validate_args("t", &schema, &json!({"path": "a.txt", "limit": null})).unwrap();
    }

    #[test]
    fn test_missing_required_field() {
        let schema = schema_of::<Args>();
        let err = validate_args("t", &schema, &json!({})).unwrap_err();
        assert!(matches!(err, AgentError::SchemaViolation { .. }));
    }

    #[test]
    fn test_wrong_type_and_extra_field() {
        let schema = schema_of::<Args>();
        assert!(validate_args("t", &schema, &json!({"path": 5})).is_err());
        assert!(validate_args("t", &schema, &json!({"path": "a", "tags": [1]})).is_err());
        assert!(validate_args("t", &schema, &json!({"path": "a", "limit": -1})).is_err());
        assert!(validate_args("t", &schema, &json!({"path": "a", "mode": "rw"})).is_err());
        assert!(validate_args("t", &schema, &json!("a")).is_err());
    }
}
