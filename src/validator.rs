//! Parameter validation.
//!
//! Actions may declare a JSON Schema for their params. The broker compiles
//! the schema once, when the action is wrapped, and the returned check runs
//! inside the innermost layer of the handler stack.

use crate::error::BrokerError;
use serde_json::{json, Value};
use std::sync::Arc;

/// A compiled params check, ready to run per call.
pub type CompiledCheck = Arc<dyn Fn(&Value) -> Result<(), BrokerError> + Send + Sync>;

/// Compiles an action's params schema into a reusable check.
pub trait Validator: Send + Sync {
    fn compile(&self, schema: &Value) -> Result<CompiledCheck, BrokerError>;
}

/// JSON Schema validator backed by the `jsonschema` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSchemaValidator;

impl Validator for JsonSchemaValidator {
    fn compile(&self, schema: &Value) -> Result<CompiledCheck, BrokerError> {
        let compiled = jsonschema::JSONSchema::compile(schema)
            .map_err(|e| BrokerError::validation(format!("Invalid params schema: {}", e), None))?;
        Ok(Arc::new(move |params: &Value| {
            let outcome = compiled.validate(params);
            match outcome {
                Ok(()) => Ok(()),
                Err(errors) => {
                    let details: Vec<Value> = errors
                        .map(|e| {
                            json!({
                                "message": e.to_string(),
                                "path": e.instance_path.to_string(),
                            })
                        })
                        .collect();
                    Err(BrokerError::validation(
                        "Parameters validation error!",
                        Some(json!({ "errors": details })),
                    ))
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_params_pass() {
        let check = JsonSchemaValidator
            .compile(&json!({
                "type": "object",
                "properties": { "id": { "type": "integer" } },
                "required": ["id"],
            }))
            .unwrap();
        assert!(check(&json!({ "id": 5 })).is_ok());
    }

    #[test]
    fn invalid_params_yield_422_with_details() {
        let check = JsonSchemaValidator
            .compile(&json!({
                "type": "object",
                "properties": { "id": { "type": "integer" } },
                "required": ["id"],
            }))
            .unwrap();
        let err = check(&json!({ "id": "five" })).unwrap_err();
        assert_eq!(err.code(), 422);
        assert!(!err.is_retryable());
        let data = err.data().unwrap();
        assert!(!data["errors"].as_array().unwrap().is_empty());
    }

    #[test]
    fn broken_schema_fails_at_compile_time() {
        let err = JsonSchemaValidator
            .compile(&json!({ "type": "no-such-type" }))
            .err()
            .unwrap();
        assert_eq!(err.code(), 422);
    }
}
