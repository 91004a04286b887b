use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::{json, Number, Value as JsonValue};

use crate::collection::doc::Doc;
use crate::collection::schema::{FunctionAst, ParameterAst, ParameterKind};
use crate::error::{argument_type_error, function_execution_failed, PolybaseResult};

/// An argument passed to [`Collection::call`](crate::collection::Collection::call).
#[derive(Clone, Debug)]
pub enum CallArg {
    String(String),
    Number(Number),
    Doc(Doc),
}

impl CallArg {
    /// The value sent to the server: document references collapse to `{ "id": .. }`.
    pub fn wire_value(&self) -> JsonValue {
        match self {
            CallArg::String(value) => JsonValue::String(value.clone()),
            CallArg::Number(value) => JsonValue::Number(value.clone()),
            CallArg::Doc(doc) => json!({ "id": doc.id() }),
        }
    }

    /// Builds a `Number` argument from a float. Returns `None` for NaN and infinities.
    pub fn number(value: f64) -> Option<Self> {
        Number::from_f64(value).map(CallArg::Number)
    }
}

impl From<&str> for CallArg {
    fn from(value: &str) -> Self {
        CallArg::String(value.to_string())
    }
}

impl From<String> for CallArg {
    fn from(value: String) -> Self {
        CallArg::String(value)
    }
}

impl From<i64> for CallArg {
    fn from(value: i64) -> Self {
        CallArg::Number(value.into())
    }
}

impl From<u64> for CallArg {
    fn from(value: u64) -> Self {
        CallArg::Number(value.into())
    }
}

impl From<Number> for CallArg {
    fn from(value: Number) -> Self {
        CallArg::Number(value)
    }
}

impl From<Doc> for CallArg {
    fn from(value: Doc) -> Self {
        CallArg::Doc(value)
    }
}

impl From<&Doc> for CallArg {
    fn from(value: &Doc) -> Self {
        CallArg::Doc(value.clone())
    }
}

/// Identity the function body sees as `ctx.auth`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    #[serde(rename = "publicKey", skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// Executable form of a schema function. Mutates `args` in place.
pub trait CompiledFunction: Send + Sync {
    fn call(&self, auth: &AuthContext, args: &mut Vec<JsonValue>) -> Result<(), String>;
}

impl<F> CompiledFunction for F
where
    F: Fn(&AuthContext, &mut Vec<JsonValue>) -> Result<(), String> + Send + Sync,
{
    fn call(&self, auth: &AuthContext, args: &mut Vec<JsonValue>) -> Result<(), String> {
        self(auth, args)
    }
}

pub type CompiledFunctionArc = Arc<dyn CompiledFunction>;

/// Turns a function declaration into something that can be run locally.
pub trait FunctionCompiler: Send + Sync + 'static {
    fn compile(
        &self,
        collection_id: &str,
        function: &FunctionAst,
    ) -> PolybaseResult<CompiledFunctionArc>;
}

pub type FunctionCompilerArc = Arc<dyn FunctionCompiler>;

/// [`FunctionCompiler`] backed by native implementations registered up front.
///
/// Lookups try `<collection id>/<function>` first and fall back to the bare
/// function name.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, CompiledFunctionArc>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .functions
            .read()
            .map(|functions| functions.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` for every collection declaring `name`.
    pub fn register<F>(&self, name: impl Into<String>, function: F)
    where
        F: CompiledFunction + 'static,
    {
        self.insert(name.into(), Arc::new(function));
    }

    /// Registers `function` for a single collection.
    pub fn register_for<F>(&self, collection_id: &str, name: &str, function: F)
    where
        F: CompiledFunction + 'static,
    {
        self.insert(format!("{collection_id}/{name}"), Arc::new(function));
    }

    fn insert(&self, key: String, function: CompiledFunctionArc) {
        if let Ok(mut functions) = self.functions.write() {
            functions.insert(key, function);
        }
    }

    fn lookup(&self, collection_id: &str, name: &str) -> Option<CompiledFunctionArc> {
        let functions = self.functions.read().ok()?;
        functions
            .get(&format!("{collection_id}/{name}"))
            .or_else(|| functions.get(name))
            .cloned()
    }
}

impl FunctionCompiler for FunctionRegistry {
    fn compile(
        &self,
        collection_id: &str,
        function: &FunctionAst,
    ) -> PolybaseResult<CompiledFunctionArc> {
        self.lookup(collection_id, &function.name).ok_or_else(|| {
            function_execution_failed(format!(
                "No implementation registered for `{}` in collection `{collection_id}`",
                function.name
            ))
        })
    }
}

/// Verifies positional argument types. Only `String`, `Number` and `Record`
/// parameters are checked; other declared types accept anything.
pub(crate) fn check_arguments(parameters: &[ParameterAst], args: &[CallArg]) -> PolybaseResult<()> {
    for (index, parameter) in parameters.iter().enumerate() {
        let arg = args.get(index);
        let (valid, expected) = match parameter.kind() {
            ParameterKind::String => (matches!(arg, Some(CallArg::String(_))), "string"),
            ParameterKind::Number => (matches!(arg, Some(CallArg::Number(_))), "number"),
            ParameterKind::Record => (matches!(arg, Some(CallArg::Doc(_))), "record"),
            ParameterKind::Unchecked => (true, ""),
        };
        if !valid {
            return Err(argument_type_error(index, expected));
        }
    }
    Ok(())
}

/// Runs `function` over a private copy of `args` and returns the mutated copy.
/// Errors and panics raised by the body surface as `function-execution-failed`.
pub(crate) fn execute_isolated(
    function: &dyn CompiledFunction,
    auth: &AuthContext,
    args: &[JsonValue],
) -> PolybaseResult<Vec<JsonValue>> {
    let mut scratch = args.to_vec();
    match panic::catch_unwind(AssertUnwindSafe(|| function.call(auth, &mut scratch))) {
        Ok(Ok(())) => Ok(scratch),
        Ok(Err(message)) => Err(function_execution_failed(message)),
        Err(payload) => Err(function_execution_failed(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "function panicked".to_string()
    }
}
