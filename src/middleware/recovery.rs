use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use super::Middleware;
use crate::context::{Context, ErrorType};

/// Callback invoked with the panic message after a downstream stage panicked.
pub type RecoveryHandler = Arc<dyn Fn(&mut Context, &str) + Send + Sync>;

/// Turns a panic in a later stage into a 500 response.
///
/// The panic is logged at `error`, recorded as a private error on the
/// context, and the chain is aborted. With a custom handler the handler
/// decides the response; otherwise a bare 500 is committed unless something
/// was already written.
#[derive(Clone, Default)]
pub struct Recovery {
    on_panic: Option<RecoveryHandler>,
}

impl fmt::Debug for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recovery")
            .field("custom_handler", &self.on_panic.is_some())
            .finish()
    }
}

impl Recovery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&mut Context, &str) + Send + Sync + 'static,
    {
        Self {
            on_panic: Some(Arc::new(handler)),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

impl Middleware for Recovery {
    fn handle(&self, c: &mut Context) {
        let Err(payload) = catch_unwind(AssertUnwindSafe(|| c.next())) else {
            return;
        };
        let message = panic_message(payload.as_ref());
        error!(
            method = %c.method(),
            path = %c.uri(),
            route = c.full_path(),
            panic = %message,
            "Recovered from panic in handler chain"
        );
        c.error(anyhow::anyhow!("panic recovered: {message}"))
            .set_type(ErrorType::PRIVATE);

        match &self.on_panic {
            Some(on_panic) => {
                c.abort();
                on_panic(c, &message);
            }
            None if c.writer().written() => c.abort(),
            None => c.abort_with_status(500),
        }
    }

    fn name(&self) -> &'static str {
        "brrtframe::middleware::Recovery"
    }
}
