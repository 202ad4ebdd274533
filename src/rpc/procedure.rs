//! Procedure handlers.
//!
//! A procedure is anything implementing [`ProcedureHandler`]: a single
//! invocation capability taking positional/keyword arguments and yielding
//! one value or failing. Plain functions and closures adapt through
//! [`procedure`]; the [`ack`] combinator wraps any handler so it is invoked
//! for effect only and always answers with the fixed acknowledgement token.

use async_trait::async_trait;
use serde_json::Value;

use crate::constants::ACK_TOKEN;
use crate::rpc::frame::ProcedureArgs;

/// Single-invocation capability. Handler-internal failures use
/// `anyhow::Error`; the dispatcher maps them to `RemoteExecutionError` at
/// the boundary and never swallows them.
#[async_trait]
pub trait ProcedureHandler: Send + Sync {
    async fn invoke(&self, args: ProcedureArgs) -> anyhow::Result<Value>;
}

/// Adapter turning a plain function or closure into a handler.
pub struct FnProcedure<F> {
    f: F,
}

/// Wrap a synchronous function or closure as a [`ProcedureHandler`].
///
/// # Examples
///
/// ```rust
/// use dataflow_worker::rpc::{procedure, ProcedureArgs, ProcedureHandler};
/// use serde_json::{json, Value};
///
/// # #[tokio::main]
/// # async fn main() {
/// let add = procedure(|args: ProcedureArgs| {
///     let a = args.arg(0).and_then(Value::as_i64).unwrap_or(0);
///     let b = args.arg(1).and_then(Value::as_i64).unwrap_or(0);
///     Ok(json!(a + b))
/// });
///
/// let result = add.invoke(ProcedureArgs::positional(vec![json!(1), json!(2)])).await;
/// assert_eq!(result.unwrap(), json!(3));
/// # }
/// ```
pub fn procedure<F>(f: F) -> FnProcedure<F>
where
    F: Fn(ProcedureArgs) -> anyhow::Result<Value> + Send + Sync,
{
    FnProcedure { f }
}

#[async_trait]
impl<F> ProcedureHandler for FnProcedure<F>
where
    F: Fn(ProcedureArgs) -> anyhow::Result<Value> + Send + Sync,
{
    async fn invoke(&self, args: ProcedureArgs) -> anyhow::Result<Value> {
        (self.f)(args)
    }
}

/// Acknowledgement combinator: invokes the wrapped handler for effect,
/// discards its return value, and always yields the fixed ack token. A
/// failure in the wrapped handler still propagates.
pub struct AckProcedure<H> {
    inner: H,
}

pub fn ack<H: ProcedureHandler>(inner: H) -> AckProcedure<H> {
    AckProcedure { inner }
}

#[async_trait]
impl<H: ProcedureHandler> ProcedureHandler for AckProcedure<H> {
    async fn invoke(&self, args: ProcedureArgs) -> anyhow::Result<Value> {
        self.inner.invoke(args).await?;
        Ok(Value::String(ACK_TOKEN.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_procedure_invokes() {
        let echo = procedure(|args: ProcedureArgs| {
            Ok(args.arg(0).cloned().unwrap_or(Value::Null))
        });

        let result = echo
            .invoke(ProcedureArgs::positional(vec![json!("hello")]))
            .await
            .unwrap();
        assert_eq!(result, json!("hello"));
    }

    #[tokio::test]
    async fn test_ack_discards_wrapped_result() {
        let wrapped = ack(procedure(|_args| Ok(json!("random output"))));

        let result = wrapped
            .invoke(ProcedureArgs::positional(vec![json!("some input")]))
            .await
            .unwrap();
        assert_eq!(result, json!(ACK_TOKEN));
    }

    #[tokio::test]
    async fn test_ack_propagates_failure() {
        let wrapped = ack(procedure(|_args| -> anyhow::Result<Value> {
            anyhow::bail!("inner failed")
        }));

        let result = wrapped.invoke(ProcedureArgs::default()).await;
        assert!(result.is_err());
    }
}
