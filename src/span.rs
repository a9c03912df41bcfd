//! The span lifecycle: one unit of controller work against a cpid.

use std::time::SystemTime;

use uuid::Uuid;

use crate::cpid::Cpid;
use crate::sender::Sender;

/// Request-scoped state threaded through a chain of [`Span`]s.
///
/// Immutable: [`start`] returns a new `RequestContext` rather than mutating
/// its argument, so a caller holding an earlier context is unaffected by a
/// callee starting further spans.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    parent_span_id: Option<String>,
}

impl RequestContext {
    /// A fresh context with no active parent span.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }
}

/// One unit of controller work against a cpid, between [`start`] and
/// [`Span::end`].
#[derive(Clone, Debug, PartialEq)]
pub struct Span {
    pub cpid: Cpid,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    pub service: String,
    pub object_kind: String,
    pub object_name: String,
    pub message: String,
    pub span_id: String,
    pub parent_id: String,
}

/// Starts a span against `cpid`, returning the child [`RequestContext`] to
/// pass to any further work plus the open span to pass to [`Span::end`].
///
/// Returns `(ctx, None)` unchanged when `cpid` is empty: an object with no
/// trace context attached is not traced, but callers still get a context to
/// thread through.
pub fn start(
    ctx: &RequestContext,
    cpid: Cpid,
    service: impl Into<String>,
    object_kind: impl Into<String>,
    object_name: impl Into<String>,
    message: impl Into<String>,
) -> (RequestContext, Option<Span>) {
    if cpid.is_empty() {
        return (ctx.clone(), None);
    }

    let span_id = Uuid::new_v4().to_string();
    let parent_id = ctx.parent_span_id().unwrap_or_default().to_string();

    let span = Span {
        cpid,
        start_time: SystemTime::now(),
        end_time: None,
        service: service.into(),
        object_kind: object_kind.into(),
        object_name: object_name.into(),
        message: message.into(),
        span_id: span_id.clone(),
        parent_id,
    };

    let child_ctx = RequestContext {
        parent_span_id: Some(span_id),
    };

    (child_ctx, Some(span))
}

impl Span {
    /// Closes the span and hands it to `sender` for delivery to the
    /// collector. Consumes the span: a closed span cannot be ended twice.
    pub async fn end(mut self, sender: &Sender) {
        self.end_time = Some(SystemTime::now());
        tracing::debug!(
            cpid = %self.cpid,
            span_id = %self.span_id,
            service = %self.service,
            "span closed"
        );
        sender.send_span(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_sender() -> Sender {
        let (sender, _setup) = Sender::init("127.0.0.1:1", Duration::from_millis(1)).unwrap();
        sender
    }

    #[test]
    fn start_with_empty_cpid_produces_no_span() {
        let ctx = RequestContext::new();
        let (child_ctx, span) = start(&ctx, Cpid::from_raw(""), "svc", "Pod", "name", "msg");
        assert!(span.is_none());
        assert_eq!(child_ctx.parent_span_id(), ctx.parent_span_id());
    }

    #[test]
    fn start_with_cpid_produces_an_open_span() {
        let ctx = RequestContext::new();
        let (child_ctx, span) = start(&ctx, Cpid::from_raw("c"), "svc", "Pod", "name", "msg");
        let span = span.expect("non-empty cpid must start a span");
        assert_eq!(span.cpid, Cpid::from_raw("c"));
        assert!(span.end_time.is_none());
        assert_eq!(span.parent_id, "");
        assert_eq!(child_ctx.parent_span_id(), Some(span.span_id.as_str()));
    }

    #[test]
    fn nested_start_chains_parent_ids() {
        let ctx = RequestContext::new();
        let (ctx2, outer) = start(&ctx, Cpid::from_raw("c"), "svc", "Pod", "outer", "msg");
        let outer = outer.unwrap();
        let (_, inner) = start(&ctx2, Cpid::from_raw("c"), "svc", "Pod", "inner", "msg");
        let inner = inner.unwrap();
        assert_eq!(inner.parent_id, outer.span_id);
    }

    #[tokio::test]
    async fn end_sets_end_time() {
        let sender = test_sender();
        let ctx = RequestContext::new();
        let (_, span) = start(&ctx, Cpid::from_raw("c"), "svc", "Pod", "name", "msg");
        let span = span.unwrap();
        assert!(span.end_time.is_none());
        span.end(&sender).await;
    }
}
