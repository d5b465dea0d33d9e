//! The read loop and inbound dispatch.

use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use serde_json::Value;

use super::handle::Vim;
use super::handlers::{display_name, Handler, HandlerFuture};
use super::Shared;
use crate::error::{HostError, Result};
use crate::models::CommandFlags;
use crate::scheduler::{isolate, Lane, WorkItem};
use crate::wire::{parse_str, CallbackResponse, FrameStream, Inbound, ReplyId};

/// Reads frames until the stream ends or the connection starts dying.
///
/// End of input comes back as [`HostError::StreamEnd`]; anything that
/// desynchronises the conversation is returned as a protocol fault.
pub(crate) async fn read_loop(shared: Arc<Shared>, mut frames: FrameStream) -> Result<()> {
    let dying = shared.supervisor.dying().clone();
    loop {
        let frame = tokio::select! {
            frame = frames.next() => frame,
            _ = dying.cancelled() => return Err(HostError::ShuttingDown),
        };
        match frame {
            None => {
                tracing::info!(instance = %shared.instance, "editor closed the connection");
                return Err(HostError::StreamEnd);
            }
            Some(Err(e)) => return Err(e),
            Some(Ok(inbound)) => handle_inbound(&shared, inbound)?,
        }
    }
}

fn handle_inbound(shared: &Arc<Shared>, inbound: Inbound) -> Result<()> {
    match inbound {
        Inbound::Callback { id, response } => shared.registry.resolve(id, response),
        Inbound::Function { reply, name, args } => dispatch_function(shared, reply, name, args),
        Inbound::Schedule { reply, id } => dispatch_scheduled(shared, reply, id),
        Inbound::Log(values) => {
            let line = values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            tracing::info!(target: "vimbridge::editor", instance = %shared.instance, "{line}");
            Ok(())
        }
    }
}

fn dispatch_function(
    shared: &Arc<Shared>,
    reply: ReplyId,
    name: String,
    args: Vec<Value>,
) -> Result<()> {
    let handler = shared.handlers.get(&name).ok_or_else(|| {
        HostError::protocol(format!("tried to invoke {name} but no function defined"))
    })?;
    let lane = handler.lane();
    let vim = Vim::on_lane(shared.clone(), lane);
    let call = bind_call(handler, vim, args)?;

    let scheduler = shared.scheduler.clone();
    let shared = shared.clone();
    let label = name.clone();
    scheduler.push(WorkItem::new(lane, label, async move {
        let response = match isolate::guarded(async move { call().await }).await {
            Ok(value) => CallbackResponse::ok(value),
            Err(e) => {
                let text = format!("got error whilst handling {}: {e:#}", display_name(&name));
                tracing::warn!(instance = %shared.instance, "{text}");
                CallbackResponse::err(text)
            }
        };
        send_reply(&shared, reply, response).await;
    }));
    Ok(())
}

/// A decoded invocation, called from inside the work item so a panic in the
/// handler itself is isolated too.
type BoundCall = Box<dyn FnOnce() -> HandlerFuture<Value> + Send>;

/// Decodes the raw arguments for `handler` and binds them into a call.
///
/// Malformed arguments are a protocol fault: the editor side of the plugin
/// always sends the shape its definition asked for.
fn bind_call(handler: Handler, vim: Vim, args: Vec<Value>) -> Result<BoundCall> {
    let mut args = args.into_iter();
    let call: BoundCall = match handler {
        Handler::Function(f) => {
            let args = array_arg(args.next(), "function arguments")?;
            Box::new(move || f(vim, args))
        }
        Handler::Internal(f) => {
            let args = array_arg(args.next(), "internal function arguments")?;
            Box::new(move || f(vim, args))
        }
        Handler::RangeFunction(f) => {
            let line1 = int_arg(args.next(), "line1")?;
            let line2 = int_arg(args.next(), "line2")?;
            let rest = array_arg(args.next(), "range function arguments")?;
            Box::new(move || f(vim, line1, line2, rest))
        }
        Handler::Command(f) => {
            let flags = args
                .next()
                .ok_or_else(|| HostError::protocol("command call without flags"))?;
            let flags: CommandFlags = serde_json::from_value(flags)
                .map_err(|e| HostError::protocol(format!("failed to decode command flags: {e}")))?;
            let rest = args
                .map(|a| parse_str(&a, "command argument").map(str::to_string))
                .collect::<Result<Vec<_>>>()?;
            Box::new(move || {
                let fut = f(vim, flags, rest);
                async move { fut.await.map(|()| Value::Null) }.boxed()
            })
        }
        Handler::AutoCommand(f) => {
            // The first argument echoes the definition.
            let values = match args.nth(1) {
                Some(v) => array_arg(Some(v), "autocommand values")?,
                None => Vec::new(),
            };
            Box::new(move || {
                let fut = f(vim, values);
                async move { fut.await.map(|()| Value::Null) }.boxed()
            })
        }
    };
    Ok(call)
}

fn array_arg(arg: Option<Value>, what: &str) -> Result<Vec<Value>> {
    match arg {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(HostError::protocol(format!(
            "expected {what} to be an array, got {other}"
        ))),
        None => Err(HostError::protocol(format!("missing {what}"))),
    }
}

fn int_arg(arg: Option<Value>, what: &str) -> Result<i64> {
    let arg = arg.ok_or_else(|| HostError::protocol(format!("missing {what}")))?;
    arg.as_i64()
        .or_else(|| arg.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| HostError::protocol(format!("expected {what} to be a number, got {arg}")))
}

fn dispatch_scheduled(shared: &Arc<Shared>, reply: ReplyId, id: u64) -> Result<()> {
    let f = shared.scheduled().remove(&id).ok_or_else(|| {
        HostError::protocol(format!(
            "failed to find scheduled callback func with id {id}"
        ))
    })?;
    let vim = Vim::event(shared.clone());
    let scheduler = shared.scheduler.clone();
    let shared = shared.clone();
    scheduler.push(WorkItem::new(
        Lane::Event,
        format!("schedule:{id}"),
        async move {
            let response = match isolate::guarded(async move { f(vim).await }).await {
                Ok(()) => CallbackResponse::ok(Value::String(String::new())),
                Err(e) => {
                    let text = format!("got error whilst handling scheduled callback {id}: {e:#}");
                    tracing::warn!(instance = %shared.instance, "{text}");
                    CallbackResponse::err(text)
                }
            };
            send_reply(&shared, reply, response).await;
        },
    ));
    Ok(())
}

/// Sends a dispatch reply. A write failure means the editor is gone.
async fn send_reply(shared: &Shared, reply: ReplyId, response: CallbackResponse) {
    if let Err(e) = shared.wire.send_response(reply, response).await {
        tracing::warn!(reply, error = %e, "failed to send reply");
        shared.supervisor.kill(Some(HostError::ShuttingDown));
    }
}
