use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Named parameters of a scenario, passed unchanged to its protocol handler.
pub type Parameters = serde_json::Map<String, Value>;

/// The value of one field of a [ResultRecord].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Integer(i64),
    Text(String),
    Bool(bool),
}

impl FieldValue {
    /// The value as a metric sample. Only numbers are metrics.
    pub fn as_metric(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => Some(*value),
            FieldValue::Integer(value) => Some(*value as f64),
            FieldValue::Text(_) | FieldValue::Bool(_) => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Integer(value.into())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// One result produced by a protocol handler, a set of named fields.
///
/// Every numeric field of a record becomes a raw metric sample when the record is persisted. Text
/// and boolean fields are carried along for the handler's own use and are not stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRecord {
    fields: Vec<(String, FieldValue)>,
}

impl ResultRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// The numeric fields of this record, in the order they were added.
    pub fn metric_fields(&self) -> Vec<(String, f64)> {
        self.fields
            .iter()
            .filter_map(|(name, value)| Some((name.clone(), value.as_metric()?)))
            .collect()
    }
}

/// Adapter for handlers that produce plain JSON objects.
///
/// Arrays, objects and nulls have no field representation and are skipped.
impl From<&serde_json::Map<String, Value>> for ResultRecord {
    fn from(object: &serde_json::Map<String, Value>) -> Self {
        object
            .iter()
            .fold(ResultRecord::new(), |record, (name, value)| match value {
                Value::Number(number) => match number.as_i64() {
                    Some(integer) => record.with_field(name.as_str(), integer),
                    None => match number.as_f64() {
                        Some(float) => record.with_field(name.as_str(), float),
                        None => record,
                    },
                },
                Value::String(text) => record.with_field(name.as_str(), text.as_str()),
                Value::Bool(flag) => record.with_field(name.as_str(), *flag),
                Value::Null | Value::Array(_) | Value::Object(_) => record,
            })
    }
}

/// The test logic for one protocol.
///
/// A handler is called synchronously, once per firing of a scenario, on a thread where blocking is
/// fine. It is responsible for bounding its own runtime. Values must be reported in the canonical
/// unit of each metric: Mbps for speeds and milliseconds for times.
pub trait ProtocolHandler: Send + Sync {
    fn run(&self, parameters: &Parameters) -> anyhow::Result<Vec<ResultRecord>>;
}

impl<F> ProtocolHandler for F
where
    F: Fn(&Parameters) -> anyhow::Result<Vec<ResultRecord>> + Send + Sync,
{
    fn run(&self, parameters: &Parameters) -> anyhow::Result<Vec<ResultRecord>> {
        self(parameters)
    }
}

/// The protocol handlers known to a scheduler, keyed by protocol name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ProtocolHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a protocol.
    ///
    /// Panics if a handler is already registered for the protocol.
    pub fn with_handler(
        mut self,
        protocol: &str,
        handler: impl ProtocolHandler + 'static,
    ) -> Self {
        let previous = self
            .handlers
            .insert(protocol.to_string(), Arc::new(handler));

        if previous.is_some() {
            panic!("Protocol handler [{}] is already registered", protocol);
        }

        self
    }

    pub fn get(&self, protocol: &str) -> Option<Arc<dyn ProtocolHandler>> {
        self.handlers.get(protocol).cloned()
    }

    pub fn contains(&self, protocol: &str) -> bool {
        self.handlers.contains_key(protocol)
    }

    /// Registered protocol names, sorted.
    pub fn protocols(&self) -> Vec<&str> {
        let mut protocols = self.handlers.keys().map(String::as_str).collect::<Vec<_>>();
        protocols.sort_unstable();
        protocols
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}
