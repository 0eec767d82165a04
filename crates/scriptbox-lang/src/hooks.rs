//! Guarded operation hooks.
//!
//! Every attribute read/write, subscript read/write and iteration performed
//! by script code goes through one of these traits. The interpreter holds a
//! `Guards` bundle; hosts can swap in their own policy objects.

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::{ExecResult, Exception};
use crate::methods;
use crate::ops;
use crate::value::Value;

pub trait AttributeAccess: Send + Sync {
    fn get_attr(&self, obj: &Value, name: &str) -> ExecResult<Value>;
    fn set_attr(&self, obj: &Value, name: &str, value: Value) -> ExecResult<()>;
}

pub trait ItemAccess: Send + Sync {
    fn get_item(&self, obj: &Value, index: &Value) -> ExecResult<Value>;
    fn set_item(&self, obj: &Value, index: Value, value: Value) -> ExecResult<()>;
}

pub trait IterationAccess: Send + Sync {
    /// Materialize the items of an iterable.
    fn iterate(&self, obj: &Value) -> ExecResult<Vec<Value>>;
}

/// Default policy: private attribute names are denied, everything else is
/// forwarded to the native operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuardedAccess;

fn deny_private(name: &str) -> ExecResult<()> {
    if name.starts_with('_') {
        return Err(Exception::attribute_error(format!(
            "\"{}\" is an invalid attribute name because it starts with \"_\"",
            name
        )));
    }
    Ok(())
}

impl AttributeAccess for GuardedAccess {
    fn get_attr(&self, obj: &Value, name: &str) -> ExecResult<Value> {
        deny_private(name)?;
        methods::native_getattr(obj, name)
    }

    fn set_attr(&self, obj: &Value, name: &str, value: Value) -> ExecResult<()> {
        deny_private(name)?;
        methods::native_setattr(obj, name, value)
    }
}

impl ItemAccess for GuardedAccess {
    fn get_item(&self, obj: &Value, index: &Value) -> ExecResult<Value> {
        ops::get_item(obj, index)
    }

    fn set_item(&self, obj: &Value, index: Value, value: Value) -> ExecResult<()> {
        ops::set_item(obj, index, value)
    }
}

impl IterationAccess for GuardedAccess {
    fn iterate(&self, obj: &Value) -> ExecResult<Vec<Value>> {
        ops::iterate(obj)
    }
}

#[derive(Clone)]
pub struct Guards {
    pub attributes: Arc<dyn AttributeAccess>,
    pub items: Arc<dyn ItemAccess>,
    pub iteration: Arc<dyn IterationAccess>,
}

impl Default for Guards {
    fn default() -> Self {
        let access = Arc::new(GuardedAccess);
        Self {
            attributes: access.clone(),
            items: access.clone(),
            iteration: access,
        }
    }
}

/// Process-wide default guards; immutable after first use.
pub static DEFAULT_GUARDS: Lazy<Guards> = Lazy::new(Guards::default);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExcKind;

    #[test]
    fn private_attributes_are_denied_at_runtime() {
        let guards = Guards::default();
        let err = guards
            .attributes
            .get_attr(&Value::str("x"), "__class__")
            .unwrap_err();
        assert_eq!(err.kind, ExcKind::AttributeError);
        let err = guards
            .attributes
            .set_attr(&Value::list(vec![]), "_x", Value::None)
            .unwrap_err();
        assert_eq!(err.kind, ExcKind::AttributeError);
    }

    #[test]
    fn public_access_is_forwarded() {
        let guards = Guards::default();
        let upper = guards.attributes.get_attr(&Value::str("x"), "upper").unwrap();
        assert!(matches!(upper, Value::Method(_)));
        let items = guards
            .iteration
            .iterate(&Value::list(vec![Value::Int(1), Value::Int(2)]))
            .unwrap();
        assert_eq!(items.len(), 2);
        let item = guards
            .items
            .get_item(&Value::str("abc"), &Value::Int(-1))
            .unwrap();
        assert_eq!(item.to_str(), "c");
    }
}
