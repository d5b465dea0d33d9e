//! The plugin served by the CLI.
//!
//! Small enough to read in one sitting, and covers every kind of
//! definition so an editor-side smoke test can exercise the whole host.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::engine::{Plugin, Vim};
use crate::models::{CommAttr, CommandFlags, Event, GenAttr, Pattern};

#[derive(Default)]
pub struct DemoPlugin {
    /// Number of BufRead events seen, reported on shutdown.
    reads: Arc<AtomicUsize>,
}

#[async_trait]
impl Plugin for DemoPlugin {
    async fn init(&self, vim: Vim) -> anyhow::Result<()> {
        vim.define_function("Hello", None, |_vim, _args| async { Ok(json!("World")) })
            .await?;

        vim.define_function(
            "HelloWithArg",
            Some(vec!["name".to_string()]),
            |_vim, args| async move {
                let name = args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("expected a name"))?;
                Ok(json!(format!("Hello {name}")))
            },
        )
        .await?;

        vim.define_function("HelloWithVarArgs", None, |_vim, args| async move {
            let words = args
                .iter()
                .map(|a| match a {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>();
            Ok(json!(format!("Hello {}", words.join(" "))))
        })
        .await?;

        vim.define_range_function("Echo", None, |vim, first, last, _args| async move {
            let mut lines = Vec::new();
            for i in first..=last {
                lines.push(vim.expr(&format!("getline({i})")).await?);
            }
            vim.ex(&format!("echom {}", json!(lines))).await?;
            Ok(Value::Null)
        })
        .await?;

        vim.define_function("Bad", None, |_vim, _args| async {
            Err(anyhow!("this is a bad function"))
        })
        .await?;

        vim.define_command(
            "HelloComm",
            &[CommAttr::General(GenAttr::Bang)],
            |vim: Vim, flags: CommandFlags, _args: Vec<String>| async move {
                if flags.bang == Some(true) {
                    vim.ex("silent echom \"Hello world (bang)\"").await?;
                } else {
                    vim.ex("silent echom \"Hello world\"").await?;
                }
                Ok(())
            },
        )
        .await?;

        let reads = self.reads.clone();
        vim.define_autocommand(
            "",
            &[Event::BUF_READ],
            &[Pattern::from("*.go")],
            false,
            move |vim: Vim, values: Vec<Value>| {
                let reads = reads.clone();
                async move {
                    reads.fetch_add(1, Ordering::Relaxed);
                    let file = values.first().and_then(Value::as_str).unwrap_or_default();
                    vim.ex(&format!("silent echom \"Hello from BufRead {file}\""))
                        .await?;
                    Ok(())
                }
            },
            &["expand('<afile>')"],
        )
        .await?;

        vim.log(format_args!(
            "demo plugin ready on {} {}",
            vim.flavor(),
            vim.version()
        ));
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        tracing::info!(
            buf_reads = self.reads.load(Ordering::Relaxed),
            "demo plugin shutting down"
        );
        Ok(())
    }
}
