//! Service and method registry.
//!
//! A [`Service`] maps method names to typed handler closures. Registration
//! captures the typed decode/invoke/encode path in a closure, so dispatch
//! needs no runtime type information: the eligibility rules (one argument in,
//! one reply out, error-shaped result) are enforced by the `register`
//! signature at compile time.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use gorpc_common::{Result, RpcError};

type HandlerFuture = Pin<Box<dyn Future<Output = std::result::Result<Value, String>> + Send>>;
type Handler = Box<dyn Fn(Value) -> std::result::Result<HandlerFuture, String> + Send + Sync>;

/// A registered procedure: its type names for the debug page, a call counter,
/// and the type-erased invocation path.
pub struct Method {
    name: String,
    arg_type: &'static str,
    reply_type: &'static str,
    calls: AtomicU64,
    handler: Handler,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }

    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }

    pub fn num_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Decodes the argument, invokes the procedure, and encodes the reply.
    ///
    /// An argument that fails to decode is rejected before the call counter
    /// is touched; the procedure's own error propagates verbatim.
    pub async fn call(&self, args: Value) -> std::result::Result<Value, String> {
        let invocation = (self.handler)(args)?;
        self.calls.fetch_add(1, Ordering::Relaxed);
        invocation.await
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Method({}({}, {}) -> error, {} calls)",
            self.name,
            self.arg_type,
            self.reply_type,
            self.num_calls()
        )
    }
}

/// A named group of procedures exposed to remote callers.
///
/// Service names must be exported identifiers (first character uppercase);
/// anything else fails at construction.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<Method>>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_uppercase())
}

impl Service {
    pub fn new(name: impl Into<String>) -> Result<Service> {
        let name = name.into();
        if !is_exported(&name) {
            return Err(RpcError::InvalidServiceName(name));
        }
        Ok(Service {
            name,
            methods: HashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<Method>> {
        self.methods.values()
    }

    pub(crate) fn method(&self, name: &str) -> Option<Arc<Method>> {
        self.methods.get(name).cloned()
    }

    /// Registers `method` with a typed async handler.
    ///
    /// The handler takes one deserializable argument and returns a
    /// serializable reply or an error string; that error string travels to
    /// the caller verbatim in the response header.
    pub fn register<A, R, H, Fut>(&mut self, method: impl Into<String>, handler: H) -> Result<()>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        H: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, String>> + Send + 'static,
    {
        let method = method.into();
        if !is_exported(&method) {
            return Err(RpcError::InvalidMethodName(method));
        }
        if self.methods.contains_key(&method) {
            return Err(RpcError::DuplicateMethod(format!("{}.{}", self.name, method)));
        }

        let label = format!("{}.{}", self.name, method);
        let decode_label = label.clone();
        let erased: Handler = Box::new(move |args: Value| {
            let args: A = serde_json::from_value(args)
                .map_err(|e| format!("rpc server: invalid argument for {decode_label}: {e}"))?;
            let invocation = handler(args);
            let fut: HandlerFuture = Box::pin(async move {
                let reply = invocation.await?;
                serde_json::to_value(reply).map_err(|e| format!("rpc server: encode reply: {e}"))
            });
            Ok(fut)
        });

        info!("rpc server: register {label}");
        self.methods.insert(
            method.clone(),
            Arc::new(Method {
                name: method,
                arg_type: std::any::type_name::<A>(),
                reply_type: std::any::type_name::<R>(),
                calls: AtomicU64::new(0),
                handler: erased,
            }),
        );
        Ok(())
    }
}
