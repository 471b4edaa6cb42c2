use serde::Deserialize;
use serde_json::Value;

/// A job as handed over by the scheduling framework.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Job {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
}

/// Endpoint and body extracted from a job's input.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub endpoint: String,
    pub body: Value,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please provide input")]
    MissingInput,

    #[error("Invalid JSON format in input")]
    InvalidJson,

    #[error("Missing 'endpoint' parameter")]
    MissingEndpoint,

    #[error("Invalid 'endpoint' parameter")]
    InvalidEndpoint,

    #[error("Missing 'body' parameter")]
    MissingBody,
}

/// Checks a job's `input` and extracts the request to forward.
///
/// `input` may be a JSON object or a string holding one. A JSON `null` counts
/// as absent, both for the input itself and for its `endpoint` and `body` keys.
pub fn validate(job_input: Option<&Value>) -> Result<ValidatedRequest, ValidationError> {
    let parsed;
    let input = match job_input {
        None | Some(Value::Null) => return Err(ValidationError::MissingInput),
        Some(Value::String(raw)) => {
            parsed = serde_json::from_str::<Value>(raw)
                .map_err(|_| ValidationError::InvalidJson)?;
            &parsed
        }
        Some(value) => value,
    };

    let endpoint = match input.get("endpoint") {
        None | Some(Value::Null) => return Err(ValidationError::MissingEndpoint),
        Some(Value::String(endpoint)) => endpoint.clone(),
        Some(_) => return Err(ValidationError::InvalidEndpoint),
    };

    let body = match input.get("body") {
        None | Some(Value::Null) => return Err(ValidationError::MissingBody),
        Some(body) => body.clone(),
    };

    Ok(ValidatedRequest { endpoint, body })
}
