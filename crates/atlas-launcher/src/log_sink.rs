//! Process-wide diagnostic log.
//!
//! The [`LogSink`] is an append-only, ordered history of everything the
//! launcher and the application logged. Output destinations are attached as
//! [`LogListener`]s and are invoked synchronously inside [`LogSink::append`].
//! The full history is rendered by [`LogSink::all_messages`] when a crash
//! report is built.
//!
//! All `tracing` events are routed into the sink by [`LogSinkLayer`], so
//! modules log with the ordinary `info!`/`warn!` macros.

use chrono::{DateTime, Local};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Name under which the default console listener is registered.
pub const CONSOLE_LISTENER: &str = "console";

/// Name under which the `--log` file listener is registered.
pub const FILE_LISTENER: &str = "file";

/// Errors reported by the log sink.
#[derive(Debug, Error)]
pub enum LogError {
    /// The calling thread is already inside the sink (e.g. a listener logged).
    #[error("Log sink re-entered from the same thread")]
    Reentrant,
}

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Recoverable problem
    Warning,
    /// Error
    Error,
    /// Unrecoverable failure that terminates the process
    Crash,
}

impl LogLevel {
    /// Returns the fixed-width display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO ",
            Self::Warning => "WARN ",
            Self::Error => "ERROR",
            Self::Crash => "CRASH",
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Self::Error,
            tracing::Level::WARN => Self::Warning,
            tracing::Level::INFO => Self::Info,
            tracing::Level::DEBUG | tracing::Level::TRACE => Self::Debug,
        }
    }
}

/// Returns a printable identity for the current thread.
///
/// Named threads use their name, unnamed ones the `ThreadId` debug form.
#[must_use]
pub fn current_thread_label() -> String {
    thread_label(&std::thread::current())
}

/// Returns a printable identity for `thread`.
#[must_use]
pub fn thread_label(thread: &std::thread::Thread) -> String {
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Position in the sink, assigned on append
    pub sequence: u64,
    /// Wall-clock time the entry was created
    pub timestamp: DateTime<Local>,
    /// Severity
    pub level: LogLevel,
    /// Message text
    pub message: String,
    /// Originating thread, if known
    pub thread: Option<String>,
    /// Captured stack trace, if any
    pub stack_trace: Option<String>,
}

impl LogEntry {
    /// Creates an entry with no thread or stack trace attached.
    #[must_use]
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            timestamp: Local::now(),
            level,
            message: message.into(),
            thread: None,
            stack_trace: None,
        }
    }

    /// Attaches an explicit originating thread.
    #[must_use]
    pub fn with_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = Some(thread.into());
        self
    }

    /// Attaches the calling thread as the originating thread.
    #[must_use]
    pub fn with_current_thread(self) -> Self {
        self.with_thread(current_thread_label())
    }

    /// Attaches a stack trace.
    #[must_use]
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        let trace = trace.into();
        if !trace.trim().is_empty() {
            self.stack_trace = Some(trace);
        }
        self
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}]",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.level.name()
        )?;
        if let Some(thread) = &self.thread {
            write!(f, " [{thread}]")?;
        }
        write!(f, " {}", self.message)?;
        if let Some(trace) = &self.stack_trace {
            for line in trace.lines() {
                write!(f, "\n    {line}")?;
            }
        }
        Ok(())
    }
}

/// An output destination attached to the sink.
///
/// Listeners run synchronously inside [`LogSink::append`] while the sink is
/// held. They must not log through the sink themselves and must not panic;
/// write failures are swallowed.
pub trait LogListener: Send + Sync {
    /// Receives one appended entry.
    fn on_entry(&self, entry: &LogEntry);
}

/// Writes entries to standard error.
#[derive(Debug, Default)]
pub struct ConsoleListener;

impl ConsoleListener {
    /// Creates a console listener.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl LogListener for ConsoleListener {
    fn on_entry(&self, entry: &LogEntry) {
        let stderr = io::stderr();
        let mut out = stderr.lock();
        let _ = writeln!(out, "{entry}");
    }
}

/// Writes entries to a file, flushing after each one.
pub struct FileListener {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    failures: AtomicU64,
}

impl FileListener {
    /// Creates (or truncates) the log file at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            failures: AtomicU64::new(0),
        })
    }

    /// Target file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries that could not be written.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl LogListener for FileListener {
    fn on_entry(&self, entry: &LogEntry) {
        let mut writer = self.writer.lock();
        if writeln!(writer, "{entry}").and_then(|()| writer.flush()).is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for FileListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileListener")
            .field("path", &self.path)
            .field("failures", &self.failures())
            .finish()
    }
}

#[derive(Default)]
struct SinkState {
    entries: Vec<LogEntry>,
    listeners: Vec<(String, Arc<dyn LogListener>)>,
    next_sequence: u64,
}

/// Append-only, ordered diagnostic log with pluggable listeners.
///
/// Appends from different threads serialize on an internal lock, so entries
/// are never interleaved mid-entry and each thread's own appends keep their
/// relative order. A nested append from the thread that already holds the
/// sink fails with [`LogError::Reentrant`] instead of deadlocking.
pub struct LogSink {
    state: ReentrantMutex<RefCell<SinkState>>,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink {
    /// Creates an empty sink with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(SinkState::default())),
        }
    }

    /// Creates a sink with the default console listener attached.
    #[must_use]
    pub fn with_console() -> Self {
        let sink = Self::new();
        // Nobody else can hold a fresh sink.
        let _ = sink.add_listener(CONSOLE_LISTENER, Arc::new(ConsoleListener::new()));
        sink
    }

    /// Appends an entry and forwards it to every listener.
    ///
    /// Returns the sequence number assigned to the entry.
    pub fn append(&self, mut entry: LogEntry) -> Result<u64, LogError> {
        let guard = self.state.lock();
        let mut state = guard.try_borrow_mut().map_err(|_| LogError::Reentrant)?;

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        entry.sequence = sequence;

        for (_, listener) in &state.listeners {
            listener.on_entry(&entry);
        }
        state.entries.push(entry);
        Ok(sequence)
    }

    /// Convenience wrapper that appends a message from the calling thread.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<u64, LogError> {
        self.append(LogEntry::new(level, message).with_current_thread())
    }

    /// Attaches a listener that receives every entry appended from now on.
    ///
    /// A listener already registered under `name` is replaced.
    pub fn add_listener(
        &self,
        name: impl Into<String>,
        listener: Arc<dyn LogListener>,
    ) -> Result<(), LogError> {
        let name = name.into();
        let guard = self.state.lock();
        let mut state = guard.try_borrow_mut().map_err(|_| LogError::Reentrant)?;
        match state.listeners.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = listener,
            None => state.listeners.push((name, listener)),
        }
        Ok(())
    }

    /// Detaches the listener registered under `name`.
    pub fn remove_listener(&self, name: &str) -> Result<bool, LogError> {
        let guard = self.state.lock();
        let mut state = guard.try_borrow_mut().map_err(|_| LogError::Reentrant)?;
        let before = state.listeners.len();
        state.listeners.retain(|(n, _)| n != name);
        Ok(state.listeners.len() != before)
    }

    /// Names of the attached listeners, in attach order.
    pub fn listener_names(&self) -> Result<Vec<String>, LogError> {
        let guard = self.state.lock();
        let state = guard.try_borrow().map_err(|_| LogError::Reentrant)?;
        Ok(state.listeners.iter().map(|(n, _)| n.clone()).collect())
    }

    /// Snapshot of every entry appended so far.
    pub fn entries(&self) -> Result<Vec<LogEntry>, LogError> {
        let guard = self.state.lock();
        let state = guard.try_borrow().map_err(|_| LogError::Reentrant)?;
        Ok(state.entries.clone())
    }

    /// Number of entries appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        let guard = self.state.lock();
        guard.try_borrow().map_or(0, |state| state.entries.len())
    }

    /// Returns true if nothing has been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders the full ordered history as one text blob.
    pub fn all_messages(&self) -> Result<String, LogError> {
        let guard = self.state.lock();
        let state = guard.try_borrow().map_err(|_| LogError::Reentrant)?;
        let mut out = String::new();
        for entry in &state.entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        Ok(out)
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink").field("entries", &self.len()).finish()
    }
}

/// `tracing` layer that appends every event to a [`LogSink`].
pub struct LogSinkLayer {
    sink: Arc<LogSink>,
}

impl LogSinkLayer {
    /// Creates a layer feeding `sink`.
    #[must_use]
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self { sink }
    }
}

impl<S: Subscriber> Layer<S> for LogSinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let entry = LogEntry::new(LogLevel::from(*event.metadata().level()), visitor.finish())
            .with_current_thread();
        // Re-entrant events (a listener logging) are dropped.
        let _ = self.sink.append(entry);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::OnceLock;
    use tempfile::TempDir;
    use tracing_subscriber::prelude::*;

    /// Collects the messages it receives.
    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl LogListener for Recorder {
        fn on_entry(&self, entry: &LogEntry) {
            self.0.lock().push(entry.message.clone());
        }
    }

    #[test]
    fn test_append_assigns_sequence() {
        let sink = LogSink::new();
        assert_eq!(sink.log(LogLevel::Info, "first").expect("append"), 0);
        assert_eq!(sink.log(LogLevel::Info, "second").expect("append"), 1);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_all_messages_in_order() {
        let sink = LogSink::new();
        sink.log(LogLevel::Info, "alpha").expect("append");
        sink.log(LogLevel::Warning, "beta").expect("append");
        sink.append(
            LogEntry::new(LogLevel::Crash, "gamma").with_stack_trace("frame one\nframe two"),
        )
        .expect("append");

        let text = sink.all_messages().expect("snapshot");
        let alpha = text.find("alpha").expect("alpha");
        let beta = text.find("beta").expect("beta");
        let gamma = text.find("gamma").expect("gamma");
        assert!(alpha < beta && beta < gamma);
        assert!(text.contains("[WARN ]"));
        assert!(text.contains("[CRASH]"));
        assert!(text.contains("\n    frame two"));
    }

    #[test]
    fn test_listener_sees_only_later_entries() {
        let sink = LogSink::new();
        sink.log(LogLevel::Info, "before").expect("append");

        let recorder = Arc::new(Recorder::default());
        sink.add_listener("recorder", recorder.clone()).expect("listener");
        sink.log(LogLevel::Info, "after").expect("append");

        assert_eq!(*recorder.0.lock(), vec!["after".to_string()]);
    }

    #[test]
    fn test_listener_replace_and_remove() {
        let sink = LogSink::with_console();
        sink.add_listener("extra", Arc::new(Recorder::default())).expect("listener");
        sink.add_listener("extra", Arc::new(Recorder::default())).expect("listener");
        assert_eq!(
            sink.listener_names().expect("names"),
            vec![CONSOLE_LISTENER.to_string(), "extra".to_string()]
        );

        assert!(sink.remove_listener(CONSOLE_LISTENER).expect("remove"));
        assert!(!sink.remove_listener(CONSOLE_LISTENER).expect("remove"));
    }

    #[test]
    fn test_file_listener_writes_in_order() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("logs").join("atlas.log");

        let sink = LogSink::new();
        sink.log(LogLevel::Info, "not in file").expect("append");
        let listener = Arc::new(FileListener::create(&path).expect("create log file"));
        sink.add_listener(FILE_LISTENER, listener.clone()).expect("listener");

        for i in 0..20 {
            sink.log(LogLevel::Info, format!("line {i}")).expect("append");
        }

        let contents = std::fs::read_to_string(&path).expect("read log file");
        assert!(!contents.contains("not in file"));
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 20);
        for (i, line) in lines.iter().enumerate() {
            assert!(line.ends_with(&format!("line {i}")), "unexpected line {line}");
        }
        assert_eq!(listener.failures(), 0);
    }

    #[test]
    fn test_concurrent_appends_keep_per_thread_order() {
        let sink = Arc::new(LogSink::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let sink = sink.clone();
                std::thread::Builder::new()
                    .name(format!("writer-{t}"))
                    .spawn(move || {
                        for i in 0..250 {
                            sink.log(LogLevel::Info, format!("{t}:{i}")).expect("append");
                        }
                    })
                    .expect("spawn writer")
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        let entries = sink.entries().expect("entries");
        assert_eq!(entries.len(), 1000);
        for t in 0..4 {
            let own: Vec<usize> = entries
                .iter()
                .filter(|e| e.thread.as_deref() == Some(format!("writer-{t}").as_str()))
                .map(|e| {
                    let (_, i) = e.message.split_once(':').expect("well-formed message");
                    i.parse().expect("index")
                })
                .collect();
            assert_eq!(own, (0..250).collect::<Vec<_>>());
        }
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.sequence, i as u64);
        }
    }

    /// Listener that tries to log into the sink it is attached to.
    struct Echo(OnceLock<Arc<LogSink>>, Mutex<Option<bool>>);

    impl LogListener for Echo {
        fn on_entry(&self, _entry: &LogEntry) {
            if let Some(sink) = self.0.get() {
                let reentrant =
                    matches!(sink.log(LogLevel::Info, "echo"), Err(LogError::Reentrant));
                *self.1.lock() = Some(reentrant);
            }
        }
    }

    #[test]
    fn test_reentrant_append_is_rejected() {
        let sink = Arc::new(LogSink::new());
        let echo = Arc::new(Echo(OnceLock::new(), Mutex::new(None)));
        let _ = echo.0.set(sink.clone());
        sink.add_listener("echo", echo.clone()).expect("listener");

        sink.log(LogLevel::Info, "outer").expect("append");

        assert_eq!(*echo.1.lock(), Some(true));
        assert_eq!(sink.len(), 1);
        // Break the Arc cycle.
        sink.remove_listener("echo").expect("remove");
    }

    #[test]
    fn test_tracing_layer_routes_events() {
        let sink = Arc::new(LogSink::new());
        let subscriber = tracing_subscriber::registry().with(LogSinkLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("map loaded");
            tracing::warn!(seed = 42, "seed rejected");
        });

        let entries = sink.entries().expect("entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[0].message, "map loaded");
        assert_eq!(entries[1].level, LogLevel::Warning);
        assert_eq!(entries[1].message, "seed rejected seed=42");
        assert!(entries[1].thread.is_some());
    }

    proptest! {
        #[test]
        fn prop_snapshot_preserves_append_order(
            messages in proptest::collection::vec("[a-z]{1,12}", 0..40)
        ) {
            let sink = LogSink::new();
            for message in &messages {
                sink.log(LogLevel::Info, message.clone()).expect("append");
            }
            let entries = sink.entries().expect("entries");
            let logged: Vec<String> = entries.into_iter().map(|e| e.message).collect();
            prop_assert_eq!(logged, messages.clone());

            let text = sink.all_messages().expect("snapshot");
            prop_assert_eq!(text.lines().count(), messages.len());
        }
    }
}
