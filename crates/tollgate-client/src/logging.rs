use std::fmt::{self, Write as _};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::{prelude::*, EnvFilter};

use tollgate_core::SdkError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl From<&Level> for LogSeverity {
    fn from(level: &Level) -> Self {
        match *level {
            Level::ERROR => Self::Error,
            Level::WARN => Self::Warning,
            Level::INFO => Self::Info,
            _ => Self::Debug,
        }
    }
}

/// Receives every rendered SDK log line.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str, severity: LogSeverity);
}

impl<F> LogSink for F
where
    F: Fn(&str, LogSeverity) + Send + Sync,
{
    fn log(&self, message: &str, severity: LogSeverity) {
        self(message, severity);
    }
}

/// Renders events as `message key=value ...` and hands them to a [`LogSink`].
pub struct SinkLayer {
    sink: Arc<dyn LogSink>,
}

impl SinkLayer {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let severity = LogSeverity::from(event.metadata().level());
        self.sink.log(&visitor.finish(), severity);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }
}

/// Installs the global subscriber. Without a sink, events go to stderr
/// through the `fmt` layer.
pub fn init_logging(filter: &str, sink: Option<Arc<dyn LogSink>>) -> Result<(), SdkError> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|_| SdkError::InvalidParameters("invalid log filter directive"))?;
    let fmt_layer = sink
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_target(false));
    tracing_subscriber::registry()
        .with(filter)
        .with(sink.map(SinkLayer::new))
        .with(fmt_layer)
        .try_init()
        .map_err(|_| SdkError::AlreadyInitialized)
}
