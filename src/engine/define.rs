//! Function, command and autocommand definitions.
//!
//! Arguments are validated and the handler recorded before anything is
//! sent, so a rejected definition never reaches the editor.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};

use super::handle::{check, Vim};
use super::handlers::{Handler, COMMAND_PREFIX, FUNCTION_PREFIX, INTERNAL_PREFIX};
use crate::error::{HostError, Result};
use crate::models::autocmd::{self, Event, Pattern};
use crate::models::{CommAttr, CommandAttrs, CommandFlags};

fn validate_name(what: &str, name: &str) -> Result<()> {
    match name.chars().next() {
        None => Err(HostError::validation(format!("{what} name must not be empty"))),
        Some(c) if !c.is_uppercase() => Err(HostError::validation(format!(
            "{what} name {name:?} must begin with a capital letter"
        ))),
        Some(_) => Ok(()),
    }
}

impl Vim {
    /// Defines an editor function `name` that calls `f`.
    ///
    /// `params` names the editor-side parameters; `None` makes the function
    /// variadic.
    pub async fn define_function<F, Fut>(
        &self,
        name: &str,
        params: Option<Vec<String>>,
        f: F,
    ) -> Result<()>
    where
        F: Fn(Vim, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler = Handler::Function(Arc::new(move |vim: Vim, args: Vec<Value>| {
            f(vim, args).boxed()
        }));
        self.define_function_kind("function", name, params, handler)
            .await
    }

    /// Like [`Vim::define_function`], but the function accepts a range and
    /// `f` receives the first and last line.
    pub async fn define_range_function<F, Fut>(
        &self,
        name: &str,
        params: Option<Vec<String>>,
        f: F,
    ) -> Result<()>
    where
        F: Fn(Vim, i64, i64, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler = Handler::RangeFunction(Arc::new(
            move |vim: Vim, line1: i64, line2: i64, args: Vec<Value>| {
                f(vim, line1, line2, args).boxed()
            },
        ));
        self.define_function_kind("rangefunction", name, params, handler)
            .await
    }

    async fn define_function_kind(
        &self,
        kind: &str,
        name: &str,
        params: Option<Vec<String>>,
        handler: Handler,
    ) -> Result<()> {
        validate_name("function", name)?;
        let handle = format!("{FUNCTION_PREFIX}{name}");
        if !self.shared.handlers.register(&handle, handler) {
            return Err(HostError::validation(format!(
                "function already defined with name {name:?}"
            )));
        }

        let params = params.unwrap_or_else(|| vec!["...".to_string()]);
        let resp = self
            .call_editor(kind, vec![json!(name), json!(params)])
            .await?;
        check(resp, || format!("define {name:?}")).map(drop)
    }

    /// Defines a user command `name` with the given attributes.
    pub async fn define_command<F, Fut>(&self, name: &str, attrs: &[CommAttr], f: F) -> Result<()>
    where
        F: Fn(Vim, CommandFlags, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        validate_name("command", name)?;
        let attrs = CommandAttrs::validate(attrs).map_err(HostError::Validation)?;

        let handle = format!("{COMMAND_PREFIX}{name}");
        let handler = Handler::Command(Arc::new(
            move |vim: Vim, flags: CommandFlags, args: Vec<String>| f(vim, flags, args).boxed(),
        ));
        if !self.shared.handlers.register(&handle, handler) {
            return Err(HostError::validation(format!(
                "command already defined with name {name:?}"
            )));
        }

        let resp = self
            .call_editor("command", vec![json!(name), attrs.to_value()])
            .await?;
        check(resp, || format!("define {name:?}")).map(drop)
    }

    /// Defines an autocommand for `events` on files matching `patterns`.
    ///
    /// `exprs` are evaluated by the editor when the event fires; `f`
    /// receives their values.
    pub async fn define_autocommand<F, Fut>(
        &self,
        group: &str,
        events: &[Event],
        patterns: &[Pattern],
        nested: bool,
        f: F,
        exprs: &[&str],
    ) -> Result<()>
    where
        F: Fn(Vim, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if events.is_empty() {
            return Err(HostError::validation("autocommand needs at least one event"));
        }
        let def = autocmd::definition(group, events, patterns, nested);
        let handle = self.shared.handlers.next_autocmd_handle();
        let handler = Handler::AutoCommand(Arc::new(move |vim: Vim, values: Vec<Value>| {
            f(vim, values).boxed()
        }));
        if !self.shared.handlers.register(&handle, handler) {
            return Err(HostError::validation(format!(
                "function already defined with handler {handle:?}"
            )));
        }

        let resp = self
            .call_editor("autocmd", vec![json!(handle), json!(def), json!(exprs)])
            .await?;
        check(resp, || format!("define autocmd {def:?}")).map(drop)
    }

    /// Registers a host-side function the editor can call as
    /// `internal:<name>`. Nothing is sent to the editor; internal functions
    /// always run on the event queue.
    pub fn define_internal_function<F, Fut>(&self, name: &str, f: F) -> Result<()>
    where
        F: Fn(Vim, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        validate_name("function", name)?;
        let handle = format!("{INTERNAL_PREFIX}{name}");
        let handler = Handler::Internal(Arc::new(move |vim: Vim, args: Vec<Value>| {
            f(vim, args).boxed()
        }));
        if !self.shared.handlers.register(&handle, handler) {
            return Err(HostError::validation(format!(
                "function already defined with name {name:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("function", "Hello").is_ok());
        assert!(validate_name("function", "Éclair").is_ok());
        assert_eq!(
            validate_name("function", "").unwrap_err().to_string(),
            "function name must not be empty"
        );
        assert_eq!(
            validate_name("command", "lowercase").unwrap_err().to_string(),
            "command name \"lowercase\" must begin with a capital letter"
        );
        assert!(validate_name("function", "1st").is_err());
    }
}
