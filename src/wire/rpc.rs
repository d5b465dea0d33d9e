//! Neovim msgpack-RPC backend.
//!
//! Message shapes:
//! - request: `[0, msgid, method, params]`
//! - response: `[1, msgid, error, result]`
//! - notification: `[2, method, params]`
//!
//! Host calls become requests whose msgid is the call id, so the editor's
//! response resolves the callback directly. The common editor operations map
//! onto the native API (`nvim_command`, `nvim_eval`, `nvim_call_function`);
//! every other call kind is routed through the editor-side dispatcher
//! function `vimbridge#call(kind, args)`.
//!
//! Editor calls into the host arrive as `function` and `schedule` requests
//! whose params mirror the channel payload. `log` notifications carry
//! diagnostics and a `vimbridge_shutdown` notification ends the stream.

use std::io::{self, Cursor};

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use rmpv::Value as MsgValue;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::value::{from_json, to_json};
use super::{CallId, CallbackResponse, FrameStream, Inbound, ReplyId, Wire};
use crate::error::{HostError, Result};

const REQUEST: u64 = 0;
const RESPONSE: u64 = 1;
const NOTIFICATION: u64 = 2;

/// Editor-side function that handles every non-native call kind.
pub const EDITOR_DISPATCH: &str = "vimbridge#call";

/// Notification the editor sends when it is about to exit.
pub const SHUTDOWN_NOTIFICATION: &str = "vimbridge_shutdown";

/// Write half of the rpc backend.
pub struct RpcWire<W> {
    out: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> RpcWire<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: Mutex::new(writer),
        }
    }

    async fn send_message(&self, message: MsgValue) -> Result<()> {
        tracing::trace!(message = %message, "send msgpack message");
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &message)
            .map_err(|e| HostError::protocol(format!("failed to encode request: {e}")))?;

        let mut out = self.out.lock().await;
        out.write_all(&buf).await?;
        out.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Wire for RpcWire<W> {
    async fn issue_call(&self, id: CallId, kind: &str, args: Vec<Value>) -> Result<()> {
        let (method, params) = request_for(kind, args);
        self.send_message(MsgValue::Array(vec![
            MsgValue::Integer(REQUEST.into()),
            MsgValue::Integer(id.into()),
            MsgValue::String(method.into()),
            MsgValue::Array(params),
        ]))
        .await
    }

    async fn send_response(&self, reply: ReplyId, response: CallbackResponse) -> Result<()> {
        let (error, result) = if response.is_err() {
            (MsgValue::String(response.error.into()), MsgValue::Nil)
        } else {
            (MsgValue::Nil, from_json(&response.value))
        };
        self.send_message(MsgValue::Array(vec![
            MsgValue::Integer(RESPONSE.into()),
            MsgValue::Integer(reply.into()),
            error,
            result,
        ]))
        .await
    }

    async fn close(&self) -> Result<()> {
        let mut out = self.out.lock().await;
        out.shutdown().await?;
        Ok(())
    }
}

/// Maps a logical call onto an rpc method and its params.
fn request_for(kind: &str, args: Vec<Value>) -> (String, Vec<MsgValue>) {
    let first = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
    match kind {
        "ex" => ("nvim_command".into(), vec![MsgValue::String(first.into())]),
        "expr" => ("nvim_eval".into(), vec![MsgValue::String(first.into())]),
        "normal" => (
            "nvim_command".into(),
            vec![MsgValue::String(format!("normal {first}").into())],
        ),
        "redraw" => {
            let cmd = if first == "force" { "redraw!" } else { "redraw" };
            ("nvim_command".into(), vec![MsgValue::String(cmd.into())])
        }
        "call" => {
            let fn_args = args.iter().skip(1).map(from_json).collect();
            (
                "nvim_call_function".into(),
                vec![MsgValue::String(first.into()), MsgValue::Array(fn_args)],
            )
        }
        other => {
            let payload = MsgValue::Array(args.iter().map(from_json).collect());
            (
                "nvim_call_function".into(),
                vec![
                    MsgValue::String(EDITOR_DISPATCH.into()),
                    MsgValue::Array(vec![MsgValue::String(other.into()), payload]),
                ],
            )
        }
    }
}

/// Reads msgpack messages until end of input or a shutdown notification.
pub fn receive_loop<R>(mut reader: R) -> FrameStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    Box::pin(try_stream! {
        let mut buf = BytesMut::with_capacity(8 * 1024);
        'frames: loop {
            while let Some(message) = try_decode(&mut buf)? {
                match decode_message(message)? {
                    Decoded::Frame(frame) => yield frame,
                    Decoded::Shutdown => {
                        tracing::debug!("editor announced shutdown");
                        break 'frames;
                    }
                    Decoded::Skip => {}
                }
            }
            let n = reader.read_buf(&mut buf).await.map_err(HostError::from)?;
            if n == 0 {
                if !buf.is_empty() {
                    Err(HostError::protocol("truncated msgpack message at end of stream"))?;
                }
                break 'frames;
            }
        }
    })
}

/// Pulls one complete message off the front of `buf`, if there is one.
fn try_decode(buf: &mut BytesMut) -> Result<Option<MsgValue>> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut cursor = Cursor::new(&buf[..]);
    match rmpv::decode::read_value(&mut cursor) {
        Ok(value) => {
            let used = cursor.position() as usize;
            buf.advance(used);
            Ok(Some(value))
        }
        Err(err) if is_incomplete(&err) => Ok(None),
        Err(err) => Err(HostError::protocol(format!(
            "failed to decode msgpack message: {err}"
        ))),
    }
}

fn is_incomplete(err: &rmpv::decode::Error) -> bool {
    match err {
        rmpv::decode::Error::InvalidMarkerRead(e) | rmpv::decode::Error::InvalidDataRead(e) => {
            e.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

enum Decoded {
    Frame(Inbound),
    Shutdown,
    Skip,
}

fn decode_message(message: MsgValue) -> Result<Decoded> {
    tracing::trace!(message = %message, "recv msgpack message");
    let MsgValue::Array(parts) = message else {
        return Err(HostError::protocol(format!(
            "expected msgpack message to be an array, got {message}"
        )));
    };
    let mut parts = parts.into_iter();
    let typ = parts.next().and_then(|v| v.as_u64());

    match typ {
        Some(REQUEST) => {
            let (msgid, method, params) = match (parts.next(), parts.next(), parts.next()) {
                (Some(id), Some(method), Some(params)) => (id, method, params),
                _ => return Err(HostError::protocol("malformed rpc request")),
            };
            let reply = msgid
                .as_u64()
                .ok_or_else(|| HostError::protocol(format!("bad request id {msgid}")))?;
            let method = method_name(&method)?;
            let params = params_of(params)?;
            decode_request(reply, &method, params).map(Decoded::Frame)
        }
        Some(RESPONSE) => {
            let (msgid, error, result) = match (parts.next(), parts.next(), parts.next()) {
                (Some(id), Some(error), Some(result)) => (id, error, result),
                _ => return Err(HostError::protocol("malformed rpc response")),
            };
            let id = msgid
                .as_u64()
                .ok_or_else(|| HostError::protocol(format!("bad response id {msgid}")))?;
            let response = if error.is_nil() {
                CallbackResponse::ok(to_json(result))
            } else {
                CallbackResponse::err(error_text(error))
            };
            Ok(Decoded::Frame(Inbound::Callback { id, response }))
        }
        Some(NOTIFICATION) => {
            let (method, params) = match (parts.next(), parts.next()) {
                (Some(method), Some(params)) => (method, params),
                _ => return Err(HostError::protocol("malformed rpc notification")),
            };
            let method = method_name(&method)?;
            match method.as_str() {
                "log" => Ok(Decoded::Frame(Inbound::Log(params_of(params)?))),
                SHUTDOWN_NOTIFICATION => Ok(Decoded::Shutdown),
                other => {
                    tracing::debug!(method = other, "ignoring notification");
                    Ok(Decoded::Skip)
                }
            }
        }
        _ => Err(HostError::protocol("unknown rpc message type")),
    }
}

fn decode_request(reply: ReplyId, method: &str, params: Vec<Value>) -> Result<Inbound> {
    match method {
        "function" => {
            let mut params = params.into_iter();
            let name = params
                .next()
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| HostError::protocol("function request without a name"))?;
            Ok(Inbound::Function {
                reply,
                name,
                args: params.collect(),
            })
        }
        "schedule" => {
            let id = params
                .first()
                .and_then(Value::as_u64)
                .ok_or_else(|| HostError::protocol("schedule request without an id"))?;
            Ok(Inbound::Schedule { reply, id })
        }
        other => Err(HostError::protocol(format!("unknown rpc method {other:?}"))),
    }
}

fn method_name(method: &MsgValue) -> Result<String> {
    method
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| HostError::protocol(format!("bad rpc method {method}")))
}

fn params_of(params: MsgValue) -> Result<Vec<Value>> {
    match params {
        MsgValue::Array(items) => Ok(items.into_iter().map(to_json).collect()),
        other => Err(HostError::protocol(format!(
            "expected rpc params to be an array, got {other}"
        ))),
    }
}

/// Neovim reports errors as `[type, message]`.
fn error_text(error: MsgValue) -> String {
    match error {
        MsgValue::Array(mut parts) if parts.len() == 2 => match parts.pop() {
            Some(MsgValue::String(s)) => s.into_str().unwrap_or_default(),
            Some(other) => to_json(other).to_string(),
            None => String::new(),
        },
        MsgValue::String(s) => s.into_str().unwrap_or_default(),
        other => to_json(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn encode(value: &MsgValue) -> Vec<u8> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, value).unwrap();
        buf
    }

    fn request(id: u64, method: &str, params: Vec<MsgValue>) -> MsgValue {
        MsgValue::Array(vec![
            MsgValue::Integer(REQUEST.into()),
            MsgValue::Integer(id.into()),
            MsgValue::String(method.into()),
            MsgValue::Array(params),
        ])
    }

    #[tokio::test]
    async fn test_function_request_and_response() {
        let mut input = encode(&request(
            9,
            "function",
            vec![
                MsgValue::String("function:Hello".into()),
                MsgValue::Array(vec![MsgValue::Integer(1.into())]),
            ],
        ));
        input.extend(encode(&MsgValue::Array(vec![
            MsgValue::Integer(RESPONSE.into()),
            MsgValue::Integer(7.into()),
            MsgValue::Nil,
            MsgValue::String("ok".into()),
        ])));

        let frames: Vec<_> = receive_loop(Cursor::new(input)).collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0].as_ref().unwrap(),
            &Inbound::Function {
                reply: 9,
                name: "function:Hello".into(),
                args: vec![json!([1])],
            }
        );
        assert_eq!(
            frames[1].as_ref().unwrap(),
            &Inbound::Callback {
                id: 7,
                response: CallbackResponse::ok(json!("ok")),
            }
        );
    }

    #[tokio::test]
    async fn test_frames_split_across_reads() {
        let bytes = encode(&request(
            3,
            "schedule",
            vec![MsgValue::Integer(11.into())],
        ));
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut frames = receive_loop(rx);

        let (head, tail) = bytes.split_at(bytes.len() / 2);
        tx.write_all(head).await.unwrap();
        tx.flush().await.unwrap();
        tokio::task::yield_now().await;
        tx.write_all(tail).await.unwrap();
        drop(tx);

        let frame = frames.next().await.unwrap().unwrap();
        assert_eq!(frame, Inbound::Schedule { reply: 3, id: 11 });
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_error_response_text() {
        let input = encode(&MsgValue::Array(vec![
            MsgValue::Integer(RESPONSE.into()),
            MsgValue::Integer(2.into()),
            MsgValue::Array(vec![
                MsgValue::Integer(0.into()),
                MsgValue::String("Vim:E492: Not an editor command".into()),
            ]),
            MsgValue::Nil,
        ]));
        let frames: Vec<_> = receive_loop(Cursor::new(input)).collect().await;
        let Inbound::Callback { response, .. } = frames[0].as_ref().unwrap() else {
            panic!("expected callback");
        };
        assert_eq!(response.error, "Vim:E492: Not an editor command");
    }

    #[tokio::test]
    async fn test_shutdown_notification_ends_stream() {
        let mut input = encode(&MsgValue::Array(vec![
            MsgValue::Integer(NOTIFICATION.into()),
            MsgValue::String(SHUTDOWN_NOTIFICATION.into()),
            MsgValue::Array(vec![]),
        ]));
        input.extend(encode(&request(1, "function", vec![])));
        let frames: Vec<_> = receive_loop(Cursor::new(input)).collect().await;
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_message_is_a_fault() {
        let bytes = encode(&request(1, "schedule", vec![MsgValue::Integer(1.into())]));
        let frames: Vec<_> = receive_loop(Cursor::new(bytes[..bytes.len() - 1].to_vec()))
            .collect()
            .await;
        assert!(matches!(frames.last(), Some(Err(HostError::Protocol(_)))));
    }

    #[tokio::test]
    async fn test_issue_call_mapping() {
        let (client, mut server) = tokio::io::duplex(4096);
        let wire = RpcWire::new(client);
        wire.issue_call(4, "ex", vec![json!("echo 1")]).await.unwrap();
        wire.issue_call(5, "loaded", vec![]).await.unwrap();
        wire.send_response(8, CallbackResponse::err("boom")).await.unwrap();
        wire.close().await.unwrap();

        let mut out = Vec::new();
        server.read_to_end(&mut out).await.unwrap();
        let mut cursor = Cursor::new(out.as_slice());

        let ex = to_json(rmpv::decode::read_value(&mut cursor).unwrap());
        assert_eq!(ex, json!([0, 4, "nvim_command", ["echo 1"]]));
        let loaded = to_json(rmpv::decode::read_value(&mut cursor).unwrap());
        assert_eq!(
            loaded,
            json!([0, 5, "nvim_call_function", [EDITOR_DISPATCH, ["loaded", []]]])
        );
        let resp = to_json(rmpv::decode::read_value(&mut cursor).unwrap());
        assert_eq!(resp, json!([1, 8, "boom", null]));
    }

    #[test]
    fn test_call_and_redraw_mapping() {
        let (method, params) = request_for("call", vec![json!("strlen"), json!("abc")]);
        assert_eq!(method, "nvim_call_function");
        assert_eq!(
            to_json(MsgValue::Array(params)),
            json!(["strlen", ["abc"]])
        );

        let (_, params) = request_for("redraw", vec![json!("force")]);
        assert_eq!(to_json(MsgValue::Array(params)), json!(["redraw!"]));
    }
}
