use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Append-only log file shared by every agent of a process.
pub struct FileLogSink {
    file: Mutex<File>,
}

impl FileLogSink {
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn write_line(&self, line: &str) {
        let mut file = self.file.lock();
        let _ = writeln!(file, "{line}");
    }

    pub fn flush(&self) {
        let _ = self.file.lock().flush();
    }
}

/// One formatted line: `{time} - {LEVEL} - [{agent}] {target}: {message} {fields}`.
struct LogLine {
    timestamp: String,
    level: Level,
    agent: Option<String>,
    target: String,
    message: String,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl LogLine {
    fn render(&self) -> String {
        let mut line = format!("{} - {} - ", self.timestamp, self.level);
        if let Some(agent) = &self.agent {
            line.push_str(&format!("[{agent}] "));
        }
        line.push_str(&format!("{}: {}", self.target, self.message));
        if !self.fields.is_empty() {
            line.push(' ');
            line.push_str(&serde_json::Value::Object(self.fields.clone()).to_string());
        }
        line
    }
}

/// tracing Layer that writes events at or above `min_level` to a [`FileLogSink`].
pub struct FileLogLayer {
    sink: Arc<FileLogSink>,
    min_level: Level,
}

impl FileLogLayer {
    pub fn new(sink: Arc<FileLogSink>, min_level: Level) -> Self {
        Self { sink, min_level }
    }
}

/// Visitor that extracts fields from a tracing event or span.
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    agent: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
            agent: None,
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{value:?}");
        match field.name() {
            "message" => self.message = Some(val),
            "agent" => self.agent = Some(val.trim_matches('"').to_string()),
            name => {
                self.fields.insert(name.to_string(), serde_json::Value::String(val));
            }
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "agent" => self.agent = Some(value.to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

/// Stored on spans to propagate the `agent` field to child events.
struct AgentField(String);

impl<S> Layer<S> for FileLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        // Level ordering: ERROR < WARN < INFO < DEBUG < TRACE
        let level = *event.metadata().level();
        if level > self.min_level {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        if visitor.agent.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    if let Some(field) = span.extensions().get::<AgentField>() {
                        visitor.agent = Some(field.0.clone());
                        break;
                    }
                }
            }
        }

        let line = LogLine {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            level,
            agent: visitor.agent,
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
        };
        self.sink.write_line(&line.render());
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        attrs.record(&mut visitor);

        if let Some(agent) = visitor.agent {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(AgentField(agent));
            }
        }
    }
}
