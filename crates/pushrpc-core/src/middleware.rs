//! Invocation middleware.
//!
//! Every consumer-facing operation runs through a chain of middlewares
//! before reaching the transport. A middleware may observe or rewrite the
//! parameters, time the call, or short-circuit by returning a value
//! without calling `next`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RpcError;
use crate::key::ClientId;

/// Discriminates the operation for middleware and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationType {
    Call,
    Subscribe,
    Unsubscribe,
}

impl std::fmt::Display for InvocationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Subscribe => write!(f, "subscribe"),
            Self::Unsubscribe => write!(f, "unsubscribe"),
        }
    }
}

/// Context handed to every middleware in the chain.
#[derive(Debug, Clone)]
pub struct InvocationCtx {
    pub client_id: ClientId,
    pub item: String,
    pub invocation_type: InvocationType,
}

/// One link in the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        ctx: &InvocationCtx,
        params: Vec<Value>,
        next: Next<'_>,
    ) -> Result<Value, RpcError>;
}

/// The terminal operation a chain resolves to — the actual transport call.
#[async_trait]
pub trait Invoke: Send + Sync {
    async fn invoke(&self, ctx: &InvocationCtx, params: Vec<Value>) -> Result<Value, RpcError>;
}

/// The remainder of a middleware chain.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Invoke,
}

impl<'a> Next<'a> {
    /// Advance: run the next middleware, or the endpoint once the chain is
    /// exhausted.
    pub async fn run(self, ctx: &InvocationCtx, params: Vec<Value>) -> Result<Value, RpcError> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                head.handle(
                    ctx,
                    params,
                    Next {
                        chain: rest,
                        endpoint: self.endpoint,
                    },
                )
                .await
            }
            None => self.endpoint.invoke(ctx, params).await,
        }
    }
}

/// Run `endpoint` wrapped in `chain`, outermost middleware first.
pub async fn with_middlewares(
    chain: &[Arc<dyn Middleware>],
    ctx: &InvocationCtx,
    endpoint: &dyn Invoke,
    params: Vec<Value>,
) -> Result<Value, RpcError> {
    Next { chain, endpoint }.run(ctx, params).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Echo;

    #[async_trait]
    impl Invoke for Echo {
        async fn invoke(&self, _ctx: &InvocationCtx, params: Vec<Value>) -> Result<Value, RpcError> {
            Ok(Value::Array(params))
        }
    }

    struct Tag {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Tag {
        async fn handle(
            &self,
            ctx: &InvocationCtx,
            params: Vec<Value>,
            next: Next<'_>,
        ) -> Result<Value, RpcError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, ctx.invocation_type));
            next.run(ctx, params).await
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn handle(
            &self,
            _ctx: &InvocationCtx,
            _params: Vec<Value>,
            _next: Next<'_>,
        ) -> Result<Value, RpcError> {
            Ok(json!("intercepted"))
        }
    }

    fn ctx() -> InvocationCtx {
        InvocationCtx {
            client_id: ClientId::from("test-client".to_string()),
            item: "item".into(),
            invocation_type: InvocationType::Call,
        }
    }

    #[tokio::test]
    async fn chain_runs_outermost_first() {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Tag { name: "outer", log: log.clone() }),
            Arc::new(Tag { name: "inner", log: log.clone() }),
        ];
        let result = with_middlewares(&chain, &ctx(), &Echo, vec![json!(1)])
            .await
            .unwrap();
        assert_eq!(result, json!([1]));
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &["outer:call", "inner:call"]
        );
    }

    #[tokio::test]
    async fn middleware_may_short_circuit() {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(ShortCircuit),
            Arc::new(Tag { name: "unreached", log: log.clone() }),
        ];
        let result = with_middlewares(&chain, &ctx(), &Echo, vec![])
            .await
            .unwrap();
        assert_eq!(result, json!("intercepted"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_chain_hits_the_endpoint() {
        let result = with_middlewares(&[], &ctx(), &Echo, vec![json!("a"), json!("b")])
            .await
            .unwrap();
        assert_eq!(result, json!(["a", "b"]));
    }
}
