//! Vim JSON channel backend.
//!
//! Every frame is a JSON array `[id, payload]` on its own line.
//!
//! - Host calls go out as `[0, [callId, kind, ...args]]`.
//! - Replies to editor calls go out as `[id, [errorText, value]]`.
//! - The editor sends `[id, ["function", name, ...args]]`,
//!   `[id, ["schedule", scheduleId]]`, `[0, ["callback", callId, [errorText, value]]]`
//!   and `[0, ["log", ...]]`.

use async_stream::try_stream;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::{parse_id, parse_str, CallId, CallbackResponse, FrameStream, Inbound, ReplyId, Wire};
use crate::error::{HostError, Result};

/// Write half of the channel backend.
///
/// The writer is behind a mutex so concurrent senders never interleave
/// partial lines.
pub struct ChannelWire<W> {
    out: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> ChannelWire<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: Mutex::new(writer),
        }
    }

    async fn send_frame(&self, frame: Value) -> Result<()> {
        let mut line = serde_json::to_string(&frame)
            .map_err(|e| HostError::protocol(format!("failed to encode JSON msg: {e}")))?;
        tracing::trace!(frame = %line, "sendJSONMsg");
        line.push('\n');

        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Wire for ChannelWire<W> {
    async fn issue_call(&self, id: CallId, kind: &str, args: Vec<Value>) -> Result<()> {
        let mut payload = Vec::with_capacity(args.len() + 2);
        payload.push(json!(id));
        payload.push(json!(kind));
        payload.extend(args);
        self.send_frame(json!([0, payload])).await
    }

    async fn send_response(&self, reply: ReplyId, response: CallbackResponse) -> Result<()> {
        let body = if response.is_err() {
            json!([response.error, ""])
        } else {
            json!(["", response.value])
        };
        self.send_frame(json!([reply, body])).await
    }

    async fn close(&self) -> Result<()> {
        let mut out = self.out.lock().await;
        out.shutdown().await?;
        Ok(())
    }
}

/// Reads newline-delimited frames until end of input.
pub fn receive_loop<R>(reader: R) -> FrameStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    Box::pin(try_stream! {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await.map_err(HostError::from)? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            tracing::trace!(frame = %line, "recvJSONMsg");
            yield decode_frame(line)?;
        }
    })
}

/// Decodes one `[id, payload]` line.
pub fn decode_frame(line: &str) -> Result<Inbound> {
    let frame: Value = serde_json::from_str(line)
        .map_err(|e| HostError::protocol(format!("failed to read JSON msg: {e}")))?;
    let Value::Array(mut parts) = frame else {
        return Err(HostError::protocol(format!(
            "expected JSON msg to be an array: {line}"
        )));
    };
    if parts.len() != 2 {
        return Err(HostError::protocol(format!(
            "expected JSON msg with 2 elements, got {}",
            parts.len()
        )));
    }
    let payload = parts.pop().unwrap_or_default();
    let id = parse_id(&parts[0], "message id")?;
    decode_payload(id, payload)
}

fn decode_payload(id: u64, payload: Value) -> Result<Inbound> {
    let Value::Array(args) = payload else {
        return Err(HostError::protocol(format!(
            "expected message payload to be an array, got {payload}"
        )));
    };
    let mut args = args.into_iter();
    let typ = args
        .next()
        .ok_or_else(|| HostError::protocol("empty message payload"))?;
    let typ = parse_str(&typ, "message type")?.to_string();
    let args: Vec<Value> = args.collect();

    match typ.as_str() {
        "callback" => {
            let [call_id, resp] = args.as_slice() else {
                return Err(HostError::protocol(format!(
                    "callback expects [id, response], got {} args",
                    args.len()
                )));
            };
            let call_id = parse_id(call_id, "callback id")?;
            let resp = resp
                .as_array()
                .ok_or_else(|| HostError::protocol(format!("malformed callback response {resp}")))?;
            let error = match resp.first() {
                Some(v) => parse_str(v, "callback error")?.to_string(),
                None => String::new(),
            };
            let value = resp.get(1).cloned().unwrap_or(Value::Null);
            Ok(Inbound::Callback {
                id: call_id,
                response: CallbackResponse { error, value },
            })
        }
        "function" => {
            let mut args = args.into_iter();
            let name = args
                .next()
                .ok_or_else(|| HostError::protocol("function call without a name"))?;
            let name = parse_str(&name, "function name")?.to_string();
            Ok(Inbound::Function {
                reply: id,
                name,
                args: args.collect(),
            })
        }
        "schedule" => {
            let sched = args
                .first()
                .ok_or_else(|| HostError::protocol("schedule call without an id"))?;
            Ok(Inbound::Schedule {
                reply: id,
                id: parse_id(sched, "schedule id")?,
            })
        }
        "log" => Ok(Inbound::Log(args)),
        other => Err(HostError::protocol(format!("unknown message type {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_decode_callback() {
        let frame = decode_frame(r#"[0, ["callback", 7, ["", "ok"]]]"#).unwrap();
        assert_eq!(
            frame,
            Inbound::Callback {
                id: 7,
                response: CallbackResponse::ok(json!("ok")),
            }
        );
    }

    #[test]
    fn test_decode_callback_error_without_value() {
        let frame = decode_frame(r#"[0, ["callback", 3, ["E492: Not an editor command"]]]"#)
            .unwrap();
        let Inbound::Callback { id, response } = frame else {
            panic!("expected callback");
        };
        assert_eq!(id, 3);
        assert!(response.is_err());
        assert_eq!(response.value, Value::Null);
    }

    #[test]
    fn test_decode_function() {
        let frame = decode_frame(r#"[12, ["function", "function:Hello", ["a", 1]]]"#).unwrap();
        assert_eq!(
            frame,
            Inbound::Function {
                reply: 12,
                name: "function:Hello".into(),
                args: vec![json!(["a", 1])],
            }
        );
    }

    #[test]
    fn test_decode_schedule_and_log() {
        assert_eq!(
            decode_frame(r#"[4, ["schedule", 2]]"#).unwrap(),
            Inbound::Schedule { reply: 4, id: 2 }
        );
        assert_eq!(
            decode_frame(r#"[0, ["log", "hello", 1]]"#).unwrap(),
            Inbound::Log(vec![json!("hello"), json!(1)])
        );
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        for line in [
            "not json",
            r#"{"id": 1}"#,
            r#"[1]"#,
            r#"[-1, ["log"]]"#,
            r#"[0, "callback"]"#,
            r#"[0, ["bogus"]]"#,
            r#"[0, ["callback", "x", ["", 1]]]"#,
        ] {
            let err = decode_frame(line).unwrap_err();
            assert!(matches!(err, HostError::Protocol(_)), "{line}: {err}");
        }
    }

    #[tokio::test]
    async fn test_receive_loop_ends_cleanly_at_eof() {
        let input: &[u8] = b"[0, [\"log\", \"a\"]]\n\n[0, [\"log\", \"b\"]]\n";
        let frames: Vec<_> = receive_loop(input).collect().await;
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.is_ok()));
    }

    #[tokio::test]
    async fn test_receive_loop_yields_fault() {
        let input: &[u8] = b"[0, [\"log\"]]\n[garbage\n";
        let frames: Vec<_> = receive_loop(input).collect().await;
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1], Err(HostError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_wire_encoding() {
        let (client, mut server) = tokio::io::duplex(1024);
        let wire = ChannelWire::new(client);
        wire.issue_call(1, "ex", vec![json!("echo 1")]).await.unwrap();
        wire.send_response(5, CallbackResponse::ok(json!(42)))
            .await
            .unwrap();
        wire.send_response(6, CallbackResponse::err("boom"))
            .await
            .unwrap();
        wire.close().await.unwrap();

        let mut out = String::new();
        server.read_to_string(&mut out).await.unwrap();
        let lines: Vec<Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0], json!([0, [1, "ex", "echo 1"]]));
        assert_eq!(lines[1], json!([5, ["", 42]]));
        assert_eq!(lines[2], json!([6, ["boom", ""]]));
    }
}
