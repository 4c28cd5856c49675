use crate::backend::{Backend, BackendFactory};
use crate::core::{Entries, Method, Result, StoreError, to_object};
use serde_json::Value;
use tracing::error;

/// Fixed dispatch table over the worker's backend.
///
/// Every backend failure is turned into a `StoreError::Backend` result so it
/// travels back to the caller as data.
pub struct Dispatcher {
    backend: std::result::Result<Box<dyn Backend>, String>,
}

impl Dispatcher {
    /// Open the backend; a failure is remembered and reported on every call
    pub fn open(factory: &dyn BackendFactory) -> Self {
        let backend = factory.open().map_err(|e| {
            error!("Failed to open {}: {:#}", factory.describe(), e);
            format!("failed to open {}: {:#}", factory.describe(), e)
        });
        Self { backend }
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_ok()
    }

    /// Run one operation to completion
    pub fn execute(&mut self, method: Method, args: Vec<Value>) -> Result<Value> {
        let backend = match self.backend.as_mut() {
            Ok(backend) => &mut **backend,
            Err(reason) => return Err(StoreError::Backend(reason.clone())),
        };

        dispatch(backend, method, args)
    }
}

/// Execute `method` against `backend`
pub fn dispatch(backend: &mut dyn Backend, method: Method, args: Vec<Value>) -> Result<Value> {
    let mut args = args.into_iter();

    match method {
        Method::Load => {
            let entries = backend.entries().map_err(backend_error)?;
            Ok(Value::Object(to_object(&entries)))
        }
        Method::Replace => {
            let entries = match args.next() {
                Some(Value::Object(map)) => map.into_iter().collect::<Entries>(),
                Some(other) => {
                    return Err(StoreError::Backend(format!(
                        "replace expects an object, got {}",
                        kind_of(&other)
                    )));
                }
                None => return Err(missing(method, "entries")),
            };
            backend.replace_entries(entries).map_err(backend_error)?;
            Ok(Value::Null)
        }
        Method::Get => {
            let key = key_arg(method, args.next())?;
            Ok(backend
                .get(&key)
                .map_err(backend_error)?
                .unwrap_or(Value::Null))
        }
        Method::Set => {
            let key = key_arg(method, args.next())?;
            let value = args.next().ok_or_else(|| missing(method, "value"))?;
            backend.set(&key, value).map_err(backend_error)?;
            Ok(Value::Null)
        }
        Method::Has => {
            let key = key_arg(method, args.next())?;
            Ok(Value::Bool(backend.has(&key).map_err(backend_error)?))
        }
        Method::Delete => {
            let key = key_arg(method, args.next())?;
            Ok(Value::Bool(backend.delete(&key).map_err(backend_error)?))
        }
        Method::Clear => {
            backend.clear().map_err(backend_error)?;
            Ok(Value::Null)
        }
    }
}

fn backend_error(e: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{:#}", e))
}

fn missing(method: Method, what: &str) -> StoreError {
    StoreError::Backend(format!("{} is missing its {} argument", method, what))
}

fn key_arg(method: Method, arg: Option<Value>) -> Result<String> {
    match arg {
        Some(Value::String(key)) => Ok(key),
        Some(other) => Err(StoreError::Backend(format!(
            "{} expects a string key, got {}",
            method,
            kind_of(&other)
        ))),
        None => Err(missing(method, "key")),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
