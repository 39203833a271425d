//! JSONL tracing layer.
//!
//! Writes one JSON object per event to stderr. The `run_id` and `stage`
//! fields of enclosing spans are lifted to the top level; other event
//! fields go under `fields`.

use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::events::Level;

/// Correlation fields stored on each span.
#[derive(Debug, Clone, Default)]
struct SpanContext {
    run_id: Option<String>,
    stage: Option<String>,
}

impl Visit for SpanContext {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "run_id" => self.run_id = Some(value.to_string()),
            "stage" => self.stage = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "run_id" => self.run_id = Some(format!("{value:?}")),
            "stage" => self.stage = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

#[derive(Default)]
struct EventFields {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl EventFields {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        // NaN and infinities have no JSON form.
        let v = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.insert(field, v);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }
}

pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    pub fn stderr() -> Self {
        JsonlLayer::new(io::stderr())
    }
}

impl<W: Write> JsonlLayer<W> {
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
        let mut run_id = None;
        let mut stage = None;
        // Innermost span wins.
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(c) = span.extensions().get::<SpanContext>() {
                    if run_id.is_none() {
                        run_id.clone_from(&c.run_id);
                    }
                    if stage.is_none() {
                        stage.clone_from(&c.stage);
                    }
                }
            }
        }

        let mut fields = EventFields::default();
        event.record(&mut fields);
        // An explicit `stage` on the event overrides the span's.
        if let Some(Value::String(s)) = fields.fields.remove("stage") {
            stage = Some(s);
        }

        let level: Level = (*event.metadata().level()).into();
        let mut obj = Map::new();
        obj.insert("ts".to_string(), json!(Utc::now().to_rfc3339()));
        obj.insert("level".to_string(), json!(level));
        obj.insert("event".to_string(), json!(event.metadata().target()));
        if let Some(id) = run_id {
            obj.insert("run_id".to_string(), json!(id));
        }
        if let Some(s) = stage {
            obj.insert("stage".to_string(), json!(s));
        }
        if let Some(msg) = fields.message {
            obj.insert("message".to_string(), json!(msg));
        }
        if !fields.fields.is_empty() {
            obj.insert("fields".to_string(), Value::Object(fields.fields));
        }

        let line = Value::Object(obj).to_string();
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{line}");
        }
    }
}
