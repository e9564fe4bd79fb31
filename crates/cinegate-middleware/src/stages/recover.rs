//! Panic barrier.
//!
//! Wraps everything below it for one request. A panic anywhere in the rest of
//! the pipeline or in the handler is caught, logged with its message and the
//! backtrace from the panic site, and turned into a 500 with
//! `Connection: close`. Other requests, including ones on the same worker
//! thread, are unaffected.
//!
//! The backtrace is captured by a panic hook ([`install_panic_hook`]) because
//! by the time the unwind reaches the barrier the faulting frames are gone.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::pipeline::Stage;
use crate::types::{Request, Response, ResponseExt};
use cinegate_core::{describe_panic, GatewayError};
use futures_util::FutureExt;
use http::{header, HeaderValue};
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::Once;
use tracing::error;

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Installs a process-wide panic hook that records the backtrace of each
/// panic for the barrier to log. The previous hook still runs.
///
/// Idempotent.
pub fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            previous(info);
        }));
    });
}

/// The recorded backtrace of the last panic on this thread, or one captured
/// here when no hook is installed.
fn take_backtrace() -> Backtrace {
    PANIC_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(Backtrace::capture)
}

/// Catches panics from the rest of the pipeline.
///
/// Installs [`install_panic_hook`] on construction.
#[derive(Debug, Clone)]
pub struct RecoverMiddleware {
    _private: (),
}

impl RecoverMiddleware {
    /// Creates the barrier.
    #[must_use]
    pub fn new() -> Self {
        install_panic_hook();
        Self { _private: () }
    }
}

impl Default for RecoverMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for RecoverMiddleware {
    fn name(&self) -> &'static str {
        Stage::Recover.name()
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let method = request.method().clone();
            let path = request.uri().path().to_owned();

            match AssertUnwindSafe(next.run(ctx, request)).catch_unwind().await {
                Ok(response) => response,
                Err(payload) => {
                    let message = describe_panic(payload.as_ref());
                    let backtrace = take_backtrace();
                    error!(
                        request_id = %ctx.request_id(),
                        method = %method,
                        path = %path,
                        panic = %message,
                        backtrace = %backtrace,
                        "recovered from panic while handling request"
                    );

                    ctx.mark_close_connection();
                    let mut response =
                        Response::from_gateway_error(&GatewayError::handler_panic(message));
                    response
                        .headers_mut()
                        .insert(header::CONNECTION, HeaderValue::from_static("close"));
                    response
                }
            }
        })
    }
}
