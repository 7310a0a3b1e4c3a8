//! Scalar and table function registry.
//!
//! The analyzer resolves `UnresolvedFunction` nodes against this registry to
//! fix return types; the evaluator and the generate operator look the
//! implementation up again by name at call time. The registry is read-mostly:
//! implementations are registered during session setup and never mutated
//! mid-query.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use quarry_common::Result;

use crate::types::{DataType, StructField};
use crate::value::{Row, Value};

/// Row-wise scalar function contract.
pub trait ScalarFunction: Send + Sync {
    /// Stable lowercase function name.
    fn name(&self) -> &str;
    /// Return type inference from analyzed argument types.
    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType>;
    /// Row-wise invocation. The returned value must honour the declared
    /// return type.
    fn invoke(&self, args: &[Value]) -> Result<Value>;
    /// Strict functions are never invoked on null arguments; the evaluator
    /// short-circuits to null instead.
    fn strict(&self) -> bool {
        true
    }
}

/// Row-producing (table) function contract, consumed by the generate
/// operator. Implementations must be stateless across input rows.
pub trait TableFunction: Send + Sync {
    /// Stable lowercase function name.
    fn name(&self) -> &str;
    /// Output schema from analyzed argument types.
    fn output_fields(&self, arg_types: &[DataType]) -> Result<Vec<StructField>>;
    /// Produce zero or more rows for one input row's argument values.
    fn invoke(&self, args: &[Value]) -> Result<Vec<Row>>;
}

type ScalarMap = HashMap<String, Arc<dyn ScalarFunction>>;
type TableMap = HashMap<String, Arc<dyn TableFunction>>;

fn scalar_registry() -> &'static RwLock<ScalarMap> {
    static REGISTRY: OnceLock<RwLock<ScalarMap>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

fn table_registry() -> &'static RwLock<TableMap> {
    static REGISTRY: OnceLock<RwLock<TableMap>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register or replace a scalar function.
///
/// Returns `true` when an existing function with the same name was replaced.
pub fn register_scalar_function(func: Arc<dyn ScalarFunction>) -> bool {
    scalar_registry()
        .write()
        .expect("function registry lock poisoned")
        .insert(func.name().to_ascii_lowercase(), func)
        .is_some()
}

/// Register or replace a table function.
///
/// Returns `true` when an existing function with the same name was replaced.
pub fn register_table_function(func: Arc<dyn TableFunction>) -> bool {
    table_registry()
        .write()
        .expect("function registry lock poisoned")
        .insert(func.name().to_ascii_lowercase(), func)
        .is_some()
}

/// Lookup a scalar function by name.
pub fn get_scalar_function(name: &str) -> Option<Arc<dyn ScalarFunction>> {
    scalar_registry()
        .read()
        .expect("function registry lock poisoned")
        .get(&name.to_ascii_lowercase())
        .cloned()
}

/// Lookup a table function by name.
pub fn get_table_function(name: &str) -> Option<Arc<dyn TableFunction>> {
    table_registry()
        .read()
        .expect("function registry lock poisoned")
        .get(&name.to_ascii_lowercase())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::QuarryError;

    struct Upper;

    impl ScalarFunction for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
            match arg_types {
                [DataType::Utf8] => Ok(DataType::Utf8),
                other => Err(QuarryError::Planning(format!(
                    "upper expects one string argument, got {other:?}"
                ))),
            }
        }

        fn invoke(&self, args: &[Value]) -> Result<Value> {
            match &args[0] {
                Value::Utf8(s) => Ok(Value::Utf8(s.to_uppercase())),
                other => Err(QuarryError::Execution(format!("upper({other})"))),
            }
        }
    }

    #[test]
    fn register_and_lookup_is_case_insensitive() {
        register_scalar_function(Arc::new(Upper));
        let f = get_scalar_function("UPPER").expect("registered");
        assert_eq!(
            f.invoke(&[Value::Utf8("abc".into())]).unwrap(),
            Value::Utf8("ABC".into())
        );
        assert!(get_scalar_function("nope").is_none());
    }
}
