//! JSONL tracing layer.
//!
//! Diagnostics go to stderr as one JSON object per line; stdout stays clean
//! for command payloads.

use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::events::Level;

/// Correlation fields lifted from enclosing spans.
#[derive(Debug, Clone, Default)]
struct SpanContext {
    instance_id: Option<String>,
    application: Option<String>,
    queue: Option<String>,
    subsystem: Option<String>,
}

impl SpanContext {
    fn fill_from(&mut self, other: &SpanContext) {
        if self.instance_id.is_none() {
            self.instance_id.clone_from(&other.instance_id);
        }
        if self.application.is_none() {
            self.application.clone_from(&other.application);
        }
        if self.queue.is_none() {
            self.queue.clone_from(&other.queue);
        }
        if self.subsystem.is_none() {
            self.subsystem.clone_from(&other.subsystem);
        }
    }

    fn set(&mut self, name: &str, value: String) {
        match name {
            "instance_id" => self.instance_id = Some(value),
            "application" => self.application = Some(value),
            "queue" => self.queue = Some(value),
            "subsystem" => self.subsystem = Some(value),
            _ => {}
        }
    }
}

impl Visit for SpanContext {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.set(field.name(), format!("{:?}", value));
    }
}

/// Collects event fields into a JSON map.
struct JsonFieldVisitor {
    fields: serde_json::Map<String, serde_json::Value>,
    message: Option<String>,
}

impl JsonFieldVisitor {
    fn new() -> Self {
        JsonFieldVisitor {
            fields: serde_json::Map::new(),
            message: None,
        }
    }

    fn insert(&mut self, field: &Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for JsonFieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, serde_json::Value::String(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let s = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(s);
        } else {
            self.insert(field, serde_json::Value::String(s));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, serde_json::Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.insert(field, serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, serde_json::Value::Bool(value));
    }
}

/// JSONL tracing layer.
pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    pub fn stderr() -> Self {
        JsonlLayer {
            writer: Mutex::new(io::stderr()),
        }
    }
}

impl<W: Write> JsonlLayer<W> {
    /// Layer writing to an arbitrary sink (tests use an in-memory buffer).
    pub fn new(writer: W) -> Self {
        JsonlLayer {
            writer: Mutex::new(writer),
        }
    }
}

impl<S, W> Layer<S> for JsonlLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut context = SpanContext::default();
        attrs.record(&mut context);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(context);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let ts = Utc::now();

        // Innermost span wins for each correlation field.
        let mut context = SpanContext::default();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(span_ctx) = span.extensions().get::<SpanContext>() {
                    context.fill_from(span_ctx);
                }
            }
        }

        let mut visitor = JsonFieldVisitor::new();
        event.record(&mut visitor);

        let level: Level = (*event.metadata().level()).into();
        let mut obj = serde_json::Map::new();
        obj.insert("ts".to_string(), serde_json::json!(ts.to_rfc3339()));
        obj.insert("level".to_string(), serde_json::json!(level));
        obj.insert(
            "event".to_string(),
            serde_json::json!(event.metadata().target()),
        );
        if let Some(msg) = visitor.message {
            obj.insert("message".to_string(), serde_json::json!(msg));
        }
        for (key, value) in [
            ("instance_id", context.instance_id),
            ("application", context.application),
            ("queue", context.queue),
            ("subsystem", context.subsystem),
        ] {
            if let Some(v) = value {
                obj.insert(key.to_string(), serde_json::json!(v));
            }
        }
        if !visitor.fields.is_empty() {
            obj.insert(
                "fields".to_string(),
                serde_json::Value::Object(visitor.fields),
            );
        }

        let json = serde_json::to_string(&serde_json::Value::Object(obj)).unwrap_or_default();
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    struct BufWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for BufWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture<F: FnOnce()>(f: F) -> Vec<serde_json::Value> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let layer = JsonlLayer::new(BufWriter(buffer.clone()));
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
        let out = buffer.lock().unwrap();
        String::from_utf8_lossy(&out)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn writes_level_event_and_message() {
        let lines = capture(|| {
            tracing::warn!(target: "queue.full", message = "queue rejected entry");
        });
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["level"], "warn");
        assert_eq!(lines[0]["event"], "queue.full");
        assert_eq!(lines[0]["message"], "queue rejected entry");
        assert!(lines[0]["ts"].is_string());
    }

    #[test]
    fn extra_fields_are_typed() {
        let lines = capture(|| {
            tracing::info!(
                target: "queue.evicted",
                evicted = 3u64,
                emergency = true,
                fill = 0.5,
                "evicted"
            );
        });
        let fields = &lines[0]["fields"];
        assert_eq!(fields["evicted"], 3);
        assert_eq!(fields["emergency"], true);
        assert_eq!(fields["fill"], 0.5);
    }

    #[test]
    fn span_context_is_lifted_innermost_first() {
        let lines = capture(|| {
            let outer = tracing::info_span!("run", instance_id = "i-1", application = "outer");
            let _o = outer.enter();
            let inner = tracing::info_span!("drain", application = "billing", queue = "default");
            let _i = inner.enter();
            tracing::info!(target: "sink.retry", "retrying");
        });
        assert_eq!(lines[0]["instance_id"], "i-1");
        assert_eq!(lines[0]["application"], "billing");
        assert_eq!(lines[0]["queue"], "default");
        assert!(lines[0].get("subsystem").is_none());
    }

    #[test]
    fn event_without_fields_omits_field_map() {
        let lines = capture(|| {
            tracing::error!(target: "internal_error", "boom");
        });
        assert_eq!(lines[0]["level"], "error");
        assert!(lines[0].get("fields").is_none());
    }
}
