//! Request/response middleware around the core send call

use reqwest::{Request, Response};
use std::fmt;
use std::sync::Arc;

/// Rewrites an outgoing request (test interception, token refresh, tracing ids)
pub trait RequestHook: Send + Sync {
    fn before_send(&self, request: Request) -> Request;
}

impl<F> RequestHook for F
where
    F: Fn(Request) -> Request + Send + Sync,
{
    fn before_send(&self, request: Request) -> Request {
        self(request)
    }
}

/// Observes a raw response before status mapping; cannot alter it
pub trait ResponseHook: Send + Sync {
    fn after_send(&self, response: &Response);
}

impl<F> ResponseHook for F
where
    F: Fn(&Response) + Send + Sync,
{
    fn after_send(&self, response: &Response) {
        self(response)
    }
}

/// Ordered hook chain; request hooks run in registration order, each
/// receiving the previous hook's output.
#[derive(Clone, Default)]
pub struct Middleware {
    before: Vec<Arc<dyn RequestHook>>,
    after: Vec<Arc<dyn ResponseHook>>,
}

impl Middleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_send(mut self, hook: impl RequestHook + 'static) -> Self {
        self.before.push(Arc::new(hook));
        self
    }

    pub fn after_send(mut self, hook: impl ResponseHook + 'static) -> Self {
        self.after.push(Arc::new(hook));
        self
    }

    pub(crate) fn apply(&self, request: Request) -> Request {
        self.before
            .iter()
            .fold(request, |request, hook| hook.before_send(request))
    }

    pub(crate) fn observe(&self, response: &Response) {
        for hook in &self.after {
            hook.after_send(response);
        }
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}
