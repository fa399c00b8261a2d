//! Built-in demo routes for `serve --demo`.

use anyhow::Context as _;
use async_trait::async_trait;
use serde_json::{Value, json};
use switchboard_core::{AuthPolicy, Rule, Session};
use switchboard_registry::{CallContext, FilterContext, HandlerError, OperationHandler, RouteTable, RouteTableBuilder};

/// Returns its payload.
struct Echo;

#[async_trait]
impl OperationHandler for Echo {
    async fn main(&self, ctx: CallContext) -> Result<Value, HandlerError> {
        Ok(json!({"status": "success", "echo": ctx.payload}))
    }
}

/// Creates a player session for the caller's cookie.
struct Login;

#[async_trait]
impl OperationHandler for Login {
    async fn main(&self, ctx: CallContext) -> Result<Value, HandlerError> {
        let Some(token) = ctx.token else {
            return Err(HandlerError::rejected("a session cookie is required"));
        };
        let name = ctx
            .payload
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| HandlerError::rejected("name is required"))?;
        let session = Session::new().with("id", json!(name)).with("player", json!(true));
        ctx.store
            .save_session(&token, &session)
            .await
            .context("saving demo session")?;
        Ok(json!({"status": "success", "id": name}))
    }
}

/// Relays a counter increment to players in the room.
struct Counter;

#[async_trait]
impl OperationHandler for Counter {
    fn auth(&self) -> AuthPolicy {
        AuthPolicy::login_required().with_rule(Rule::truthy("player"))
    }

    async fn main(&self, ctx: CallContext) -> Result<Value, HandlerError> {
        let by = ctx.payload.get("by").and_then(Value::as_i64).unwrap_or(1);
        Ok(json!({"status": "success", "increase": by}))
    }
}

fn on_counter_page(ctx: &FilterContext<'_>) -> Option<Value> {
    let location = ctx.session.location()?;
    (location.path_name == "/counter").then_some(Value::Bool(true))
}

fn register(builder: &mut RouteTableBuilder) -> switchboard_registry::Result<()> {
    builder.api("api/demo/echo", Echo)?;
    builder.api("api/demo/login", Login)?;
    builder.sync_server("sync/demo/counter", Counter)?;
    builder.sync_client("sync/demo/counter", on_counter_page)?;
    Ok(())
}

/// The demo route table.
pub fn table() -> anyhow::Result<RouteTable> {
    let mut builder = RouteTable::builder();
    register(&mut builder).context("registering demo routes")?;
    builder.build().context("building demo route table")
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::OperationKind;

    #[test]
    fn demo_table_has_every_route() {
        let table = table().unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.resolve(OperationKind::Api, "api/demo/echo").is_some());
        assert!(table.resolve(OperationKind::Sync, "sync/demo/counter").is_some());
        assert!(table.sync_filter("sync/demo/counter").is_some());
    }
}
