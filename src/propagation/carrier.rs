//! Header carrier for trace context.
//!
//! # Wire Format
//! - `traceparent` / `tracestate`: W3C Trace Context
//! - `baggage`: W3C Baggage
//!
//! Encoding and decoding are done by the OpenTelemetry SDK text-map
//! propagators, composed trace context first, then baggage. Both sides of the
//! broker must agree on these keys; a mismatch degrades consumers to root
//! spans without any error.

use std::sync::OnceLock;

use opentelemetry::baggage::BaggageExt;
use opentelemetry::propagation::{
    Extractor, Injector, TextMapCompositePropagator, TextMapPropagator,
};
use opentelemetry::trace::{SpanContext, TraceContextExt, TraceFlags, TraceState};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};

use crate::broker::{Headers, Message};
use crate::propagation::context::{Baggage, TraceContext};

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";
pub const BAGGAGE_HEADER: &str = "baggage";

/// W3C trace context followed by W3C baggage.
pub fn composite_propagator() -> TextMapCompositePropagator {
    TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ])
}

fn propagator() -> &'static TextMapCompositePropagator {
    static PROPAGATOR: OnceLock<TextMapCompositePropagator> = OnceLock::new();
    PROPAGATOR.get_or_init(composite_propagator)
}

/// Write `cx` into the reserved headers of `message`.
pub fn inject(cx: &TraceContext, message: &mut Message) {
    inject_headers(cx, &mut message.headers);
}

/// Read the trace context from `message`. Never fails: missing or malformed
/// headers produce the empty context.
pub fn extract(message: &Message) -> TraceContext {
    extract_headers(&message.headers)
}

/// Header-level form of [`inject`].
///
/// Every reserved header is cleared first, so stale values never survive an
/// inject of a context that lacks them. Other headers are left untouched.
pub fn inject_headers(cx: &TraceContext, headers: &mut Headers) {
    let propagator = propagator();
    for field in propagator.fields() {
        headers.remove(field);
    }
    propagator.inject_context(&to_otel_context(cx), headers);

    if headers.get(TRACESTATE_HEADER).is_some_and(<[u8]>::is_empty) {
        headers.remove(TRACESTATE_HEADER);
    }
}

/// Header-level form of [`extract`].
pub fn extract_headers(headers: &Headers) -> TraceContext {
    from_otel_context(&propagator().extract(headers))
}

/// Convert a propagated context to an OpenTelemetry remote span context.
pub fn to_span_context(cx: &TraceContext) -> SpanContext {
    let flags = if cx.sampled {
        TraceFlags::SAMPLED
    } else {
        TraceFlags::NOT_SAMPLED
    };
    SpanContext::new(cx.trace_id, cx.span_id, flags, true, TraceState::default())
}

/// Convert an OpenTelemetry span context to a propagated context (no baggage).
pub fn from_span_context(sc: &SpanContext) -> TraceContext {
    TraceContext::new(sc.trace_id(), sc.span_id(), sc.is_sampled())
}

/// OpenTelemetry context holding `cx` as the remote span plus its baggage.
pub fn to_otel_context(cx: &TraceContext) -> Context {
    let mut otel = Context::new();
    if cx.is_valid() {
        otel = otel.with_remote_span_context(to_span_context(cx));
    }
    if !cx.baggage.is_empty() {
        otel = otel.with_baggage(
            cx.baggage
                .iter()
                .map(|(k, v)| KeyValue::new(k.to_string(), v.to_string())),
        );
    }
    otel
}

pub fn from_otel_context(otel: &Context) -> TraceContext {
    let span = otel.span();
    let mut cx = from_span_context(span.span_context());
    cx.baggage = otel
        .baggage()
        .iter()
        .map(|(key, (value, _metadata))| (key.as_str().to_string(), value.as_str().to_string()))
        .collect::<Baggage>();
    cx
}

impl Injector for Headers {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key, value);
    }
}

impl Extractor for Headers {
    fn get(&self, key: &str) -> Option<&str> {
        self.get_str(key)
    }

    fn keys(&self) -> Vec<&str> {
        self.iter().map(|h| h.key.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::{SpanId, TraceId};

    fn sample_context() -> TraceContext {
        TraceContext::new(
            TraceId::from(0x4bf92f3577b34da6a3ce929d0e0e4736u128),
            SpanId::from(0x00f067aa0ba902b7u64),
            true,
        )
    }

    #[test]
    fn test_round_trip() {
        let cx = sample_context().with_baggage(
            [("user.id", "42"), ("note", "a,b=c;d e")].into_iter().collect(),
        );
        let mut msg = Message::new("t", "v");
        inject(&cx, &mut msg);
        assert_eq!(extract(&msg), cx);
    }

    #[test]
    fn test_round_trip_unsampled() {
        let mut cx = sample_context();
        cx.sampled = false;
        let mut msg = Message::new("t", "v");
        inject(&cx, &mut msg);
        assert_eq!(
            msg.headers.get_str(TRACEPARENT_HEADER),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00")
        );
        assert!(msg.headers.get(TRACESTATE_HEADER).is_none());
        assert_eq!(extract(&msg), cx);
    }

    #[test]
    fn test_missing_headers_give_empty_context() {
        let msg = Message::new("t", "v");
        assert_eq!(extract(&msg), TraceContext::empty());
    }

    #[test]
    fn test_malformed_traceparent() {
        for bad in [
            "garbage",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-09",
        ] {
            let msg = Message::new("t", "v").with_header(TRACEPARENT_HEADER, bad);
            assert!(!extract(&msg).is_valid(), "accepted {bad}");
        }
    }

    #[test]
    fn test_non_utf8_header_is_ignored() {
        let msg = Message::new("t", "v").with_header(TRACEPARENT_HEADER, vec![0xff, 0xfe]);
        assert_eq!(extract(&msg), TraceContext::empty());
    }

    #[test]
    fn test_future_version_accepts_extra_fields() {
        let msg = Message::new("t", "v").with_header(
            TRACEPARENT_HEADER,
            "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-what",
        );
        assert!(extract(&msg).is_valid());
    }

    #[test]
    fn test_inject_overwrites_and_preserves_other_headers() {
        let mut msg = Message::new("t", "v")
            .with_header("content-type", "json")
            .with_header(TRACEPARENT_HEADER, "stale")
            .with_header(TRACESTATE_HEADER, "vendor=stale")
            .with_header(BAGGAGE_HEADER, "old=1");
        inject(&sample_context(), &mut msg);

        assert_eq!(msg.headers.get_str("content-type"), Some("json"));
        assert_eq!(
            msg.headers.get_str(TRACEPARENT_HEADER),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        );
        assert!(msg.headers.get(TRACESTATE_HEADER).is_none());
        assert!(msg.headers.get(BAGGAGE_HEADER).is_none());
    }

    #[test]
    fn test_invalid_context_clears_traceparent_but_keeps_baggage() {
        let mut msg = Message::new("t", "v").with_header(
            TRACEPARENT_HEADER,
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        );
        let cx = TraceContext::empty().with_baggage([("tenant", "acme")].into_iter().collect());
        inject(&cx, &mut msg);

        assert!(msg.headers.get(TRACEPARENT_HEADER).is_none());
        assert_eq!(extract(&msg), cx);
    }

    #[test]
    fn test_malformed_baggage_members_are_skipped() {
        let msg = Message::new("t", "v")
            .with_header(BAGGAGE_HEADER, "a=1,broken,=nokey,b=2;prop=x, c = 3 ");
        let baggage = extract(&msg).baggage;
        let pairs: Vec<_> = baggage.iter().collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "2"), ("c", "3")]);
    }

    #[test]
    fn test_baggage_without_traceparent() {
        let msg = Message::new("t", "v").with_header(BAGGAGE_HEADER, "tenant=acme");
        let cx = extract(&msg);
        assert!(!cx.is_valid());
        assert_eq!(cx.baggage.get("tenant"), Some("acme"));
    }

    #[test]
    fn test_span_context_conversion() {
        let cx = TraceContext::new(TraceId::from(7u128), SpanId::from(9u64), true);
        let sc = to_span_context(&cx);
        assert!(sc.is_remote());
        assert!(sc.is_sampled());
        assert_eq!(from_span_context(&sc), cx);
    }

    #[test]
    fn test_headers_as_otel_carrier() {
        let mut headers = Headers::new();
        Injector::set(&mut headers, "traceparent", "x".to_string());
        Injector::set(&mut headers, "traceparent", "y".to_string());
        assert_eq!(Extractor::get(&headers, "traceparent"), Some("y"));
        assert_eq!(Extractor::keys(&headers), vec!["traceparent"]);
    }
}
