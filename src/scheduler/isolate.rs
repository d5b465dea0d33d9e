//! Failure isolation for dispatched work.
//!
//! A panic inside one handler is caught at the poll boundary and turned into
//! an error carrying the panic message and the stack captured at the panic
//! site. The host keeps serving.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use once_cell::sync::Lazy;

thread_local! {
    static LAST_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Chains a hook in front of whatever hook was installed before, so the
/// default panic output is preserved.
static PANIC_HOOK: Lazy<()> = Lazy::new(|| {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let trace = Backtrace::force_capture().to_string();
        LAST_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
        previous(info);
    }));
});

/// Installs the trace-capturing panic hook. Idempotent.
pub fn install_panic_hook() {
    Lazy::force(&PANIC_HOOK);
}

/// A caught panic.
#[derive(Debug, Clone)]
pub struct PanicReport {
    pub message: String,
    pub trace: String,
}

impl fmt::Display for PanicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "caught panic: {}\n{}", self.message, self.trace)
    }
}

impl std::error::Error for PanicReport {}

impl PanicReport {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let trace = LAST_TRACE
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| "<no stack trace captured>".to_string());
        Self { message, trace }
    }
}

/// Polls `fut` to completion, converting a panic into a [`PanicReport`].
pub async fn catch_panic<F: Future>(fut: F) -> Result<F::Output, PanicReport> {
    install_panic_hook();
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(PanicReport::from_payload)
}

/// Runs a fallible handler future with panics folded into its error.
pub async fn guarded<T, F>(fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match catch_panic(fut).await {
        Ok(result) => result,
        Err(report) => Err(anyhow::Error::new(report)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passes_through_success() {
        let value = guarded(async { Ok::<_, anyhow::Error>(5) }).await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_passes_through_error() {
        let err = guarded(async { Err::<(), _>(anyhow::anyhow!("nope")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[tokio::test]
    async fn test_panic_becomes_report_with_trace() {
        let err = guarded(async {
            if true {
                panic!("handler exploded");
            }
            Ok::<(), anyhow::Error>(())
        })
        .await
        .unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("caught panic: handler exploded\n"), "{text}");
        assert!(text.lines().count() > 1);
    }

    #[tokio::test]
    async fn test_formatted_panic_message() {
        let report = catch_panic(async {
            let n = 3;
            if n > 2 {
                panic!("bad index {n}");
            }
        })
        .await
        .unwrap_err();
        assert_eq!(report.message, "bad index 3");
    }
}
