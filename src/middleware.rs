//! Middleware: functions that wrap action handlers at registration time.
//!
//! The chain is applied in registration order, building from the inside out,
//! so the first registered middleware ends up innermost:
//! `h_out = mw_n(mw_{n-1}(… mw_1(h)))`. Actions are wrapped once, when their
//! service is registered; middlewares added afterwards do not rewrap them.

use crate::service::{ActionDefinition, ActionHandler};
use std::sync::Arc;

/// A middleware transforms a handler into a wrapped handler. It receives the
/// action definition so it can inspect name, cache flag, or params schema.
pub type Middleware = Arc<dyn Fn(ActionHandler, &ActionDefinition) -> ActionHandler + Send + Sync>;

#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Middleware>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, middleware: Middleware) {
        self.middlewares.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Wrap `handler` with every registered middleware.
    pub fn wrap(&self, handler: ActionHandler, action: &ActionDefinition) -> ActionHandler {
        self.middlewares
            .iter()
            .fold(handler, |wrapped, mw| mw(wrapped, action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::service::action_handler;
    use serde_json::json;

    fn tagging_middleware(tag: &'static str) -> Middleware {
        Arc::new(move |inner, _action| {
            Arc::new(move |ctx: Context| {
                let inner = inner.clone();
                Box::pin(async move {
                    let value = inner(ctx).await?;
                    let mut tags = value.as_array().cloned().unwrap_or_default();
                    tags.push(json!(tag));
                    Ok(json!(tags))
                })
            })
        })
    }

    #[tokio::test]
    async fn first_registered_middleware_is_innermost() {
        let mut chain = MiddlewareChain::new();
        chain.add(tagging_middleware("first"));
        chain.add(tagging_middleware("second"));
        chain.add(tagging_middleware("third"));

        let action = ActionDefinition::new(
            "noop",
            action_handler(|_ctx| async { Ok(json!([])) }),
        );
        let wrapped = chain.wrap(action.handler.clone(), &action);
        let ctx = Context::new_root("test.noop", json!({}), false);
        let result = wrapped(ctx).await.unwrap();

        // innermost appends first, so registration order reads left to right
        assert_eq!(result, json!(["first", "second", "third"]));
    }

    #[tokio::test]
    async fn empty_chain_returns_handler_untouched() {
        let chain = MiddlewareChain::new();
        let action = ActionDefinition::new(
            "echo",
            action_handler(|ctx: Context| async move { Ok(ctx.params) }),
        );
        let wrapped = chain.wrap(action.handler.clone(), &action);
        let ctx = Context::new_root("test.echo", json!({ "x": 1 }), false);
        assert_eq!(wrapped(ctx).await.unwrap(), json!({ "x": 1 }));
    }
}
