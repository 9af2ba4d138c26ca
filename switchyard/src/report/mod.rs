//! Annotated, landmark-aware diagnostics.
//!
//! Every subsystem surfaces problems through an [`ErrorHandler`]: a sink for
//! [`Diagnostic`]s that counts errors and warnings as they pass through.
//! Handlers chain: veneers such as [`ContextErrorHandler`] or
//! [`LandmarkErrorHandler`] decorate diagnostics and forward them to an inner
//! handler, which may itself be a veneer. The router holds no error state of
//! its own beyond the handler it was passed.
//!
//! A diagnostic's serialized form is a line of annotations followed by the
//! message: `<3>{l:conf.sy:12}syntax error` carries level 3 (error) and a
//! landmark pointing at line 12 of `conf.sy`.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

/// Severity of a diagnostic, mapping onto the syslog levels 0 through 7,
/// with `Fatal` and `Abort` below them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Unrecoverable; handlers may abort the process.
    Abort,
    /// Fatal error; `BailErrorHandler` exits on these.
    Fatal,
    /// Syslog level 0.
    Emergency,
    /// Syslog level 1.
    Alert,
    /// Syslog level 2.
    Critical,
    /// Syslog level 3; counted in `nerrors`.
    Error,
    /// Syslog level 4; counted in `nwarnings`.
    Warning,
    /// Syslog level 5.
    Notice,
    /// Syslog level 6.
    Info,
    /// Syslog level 7.
    Debug,
}

impl Level {
    /// The syslog integer for this level (`Fatal` is -1, `Abort` -999).
    pub fn as_int(self) -> i32 {
        match self {
            Level::Abort => -999,
            Level::Fatal => -1,
            Level::Emergency => 0,
            Level::Alert => 1,
            Level::Critical => 2,
            Level::Error => 3,
            Level::Warning => 4,
            Level::Notice => 5,
            Level::Info => 6,
            Level::Debug => 7,
        }
    }

    /// Recovers a level from its syslog integer.
    pub fn from_int(value: i32) -> Option<Level> {
        Some(match value {
            -999 => Level::Abort,
            -1 => Level::Fatal,
            0 => Level::Emergency,
            1 => Level::Alert,
            2 => Level::Critical,
            3 => Level::Error,
            4 => Level::Warning,
            5 => Level::Notice,
            6 => Level::Info,
            7 => Level::Debug,
            _ => return None,
        })
    }

    /// True for `Error` and every worse level.
    pub fn is_error(self) -> bool {
        self <= Level::Error
    }
}

/// A source location attached to diagnostics: file and line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Landmark {
    file: Arc<str>,
    line: u32,
}

impl Landmark {
    /// Creates a landmark for `file:line`.
    pub fn new(file: &str, line: u32) -> Self {
        Landmark {
            file: Arc::from(file),
            line,
        }
    }

    /// The file component.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// The line component.
    pub fn line(&self) -> u32 {
        self.line
    }
}

impl fmt::Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One diagnostic: a level, an optional landmark, and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity.
    pub level: Level,
    /// Source location, when known.
    pub landmark: Option<Landmark>,
    /// The message proper, without annotations.
    pub text: String,
}

impl Diagnostic {
    /// Creates a diagnostic.
    pub fn new(level: Level, landmark: Option<Landmark>, text: impl Into<String>) -> Self {
        Diagnostic {
            level,
            landmark,
            text: text.into(),
        }
    }

    /// The serialized annotation form, `<level>{l:file:line}message`.
    pub fn annotated(&self) -> String {
        let mut out = format!("<{}>", self.level.as_int());
        if let Some(lm) = &self.landmark {
            out.push_str(&format!("{{l:{}:{}}}", lm.file(), lm.line()));
        }
        out.push_str(&self.text);
        out
    }

    /// Parses the annotation form produced by [`Diagnostic::annotated`].
    ///
    /// Unannotated text parses as an `Error`-level diagnostic with no
    /// landmark. Unknown annotations are skipped.
    pub fn parse(mut s: &str) -> Diagnostic {
        let mut level = Level::Error;
        let mut landmark = None;
        loop {
            if let Some(rest) = s.strip_prefix('<') {
                if let Some(end) = rest.find('>') {
                    if let Some(l) = rest[..end].parse().ok().and_then(Level::from_int) {
                        level = l;
                        s = &rest[end + 1..];
                        continue;
                    }
                }
            }
            if let Some(rest) = s.strip_prefix('{') {
                if let Some(end) = rest.find('}') {
                    if let Some(lspec) = rest[..end].strip_prefix("l:") {
                        if let Some((file, line)) = lspec.rsplit_once(':') {
                            if let Ok(line) = line.parse() {
                                landmark = Some(Landmark::new(file, line));
                            }
                        }
                    }
                    s = &rest[end + 1..];
                    continue;
                }
            }
            break;
        }
        Diagnostic::new(level, landmark, s)
    }

    /// A human-readable rendering: `file:line: warning: message`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(lm) = &self.landmark {
            out.push_str(&format!("{}: ", lm));
        }
        match self.level {
            Level::Warning => out.push_str("warning: "),
            Level::Debug => out.push_str("debug: "),
            l if l <= Level::Critical => out.push_str("fatal: "),
            _ => {}
        }
        out.push_str(&self.text);
        out
    }
}

/// Error and warning totals, maintained by sink handlers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorAccount {
    /// Diagnostics at `Error` or worse.
    pub nerrors: usize,
    /// Diagnostics at exactly `Warning`.
    pub nwarnings: usize,
}

impl ErrorAccount {
    /// Accounts one diagnostic at `level`.
    pub fn note(&mut self, level: Level) {
        if level.is_error() {
            self.nerrors += 1;
        } else if level == Level::Warning {
            self.nwarnings += 1;
        }
    }
}

/// A sink for diagnostics.
///
/// The convenience methods (`error`, `warning`, …) build a [`Diagnostic`]
/// and pass it to [`ErrorHandler::emit`]; `emit` implementations are
/// responsible for accounting.
pub trait ErrorHandler: Send {
    /// Delivers one diagnostic.
    fn emit(&mut self, diag: Diagnostic);

    /// Number of diagnostics seen at `Error` level or worse.
    fn nerrors(&self) -> usize;

    /// Number of diagnostics seen at `Warning` level.
    fn nwarnings(&self) -> usize;

    /// Resets the error and warning counts.
    fn reset_counts(&mut self);

    /// Emits a debug-level message.
    fn debug(&mut self, text: &str) {
        self.emit(Diagnostic::new(Level::Debug, None, text));
    }

    /// Emits an info-level message.
    fn message(&mut self, text: &str) {
        self.emit(Diagnostic::new(Level::Info, None, text));
    }

    /// Emits a warning.
    fn warning(&mut self, text: &str) {
        self.emit(Diagnostic::new(Level::Warning, None, text));
    }

    /// Emits an error.
    fn error(&mut self, text: &str) {
        self.emit(Diagnostic::new(Level::Error, None, text));
    }

    /// Emits a fatal error.
    fn fatal(&mut self, text: &str) {
        self.emit(Diagnostic::new(Level::Fatal, None, text));
    }

    /// Emits a warning with a landmark annotation.
    fn lwarning(&mut self, landmark: &Landmark, text: &str) {
        self.emit(Diagnostic::new(Level::Warning, Some(landmark.clone()), text));
    }

    /// Emits an error with a landmark annotation.
    fn lerror(&mut self, landmark: &Landmark, text: &str) {
        self.emit(Diagnostic::new(Level::Error, Some(landmark.clone()), text));
    }
}

/// Discards diagnostics, counting them.
#[derive(Default)]
pub struct SilentErrorHandler {
    account: ErrorAccount,
}

impl SilentErrorHandler {
    /// Creates a silent handler.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ErrorHandler for SilentErrorHandler {
    fn emit(&mut self, diag: Diagnostic) {
        self.account.note(diag.level);
    }
    fn nerrors(&self) -> usize {
        self.account.nerrors
    }
    fn nwarnings(&self) -> usize {
        self.account.nwarnings
    }
    fn reset_counts(&mut self) {
        self.account = ErrorAccount::default();
    }
}

/// Renders diagnostics to a write destination, one line each.
pub struct FileErrorHandler<W: Write + Send> {
    sink: W,
    account: ErrorAccount,
}

impl<W: Write + Send> FileErrorHandler<W> {
    /// Creates a handler writing rendered diagnostics to `sink`.
    pub fn new(sink: W) -> Self {
        FileErrorHandler {
            sink,
            account: ErrorAccount::default(),
        }
    }
}

impl<W: Write + Send> ErrorHandler for FileErrorHandler<W> {
    fn emit(&mut self, diag: Diagnostic) {
        self.account.note(diag.level);
        let _ = writeln!(self.sink, "{}", diag.render());
    }
    fn nerrors(&self) -> usize {
        self.account.nerrors
    }
    fn nwarnings(&self) -> usize {
        self.account.nwarnings
    }
    fn reset_counts(&mut self) {
        self.account = ErrorAccount::default();
    }
}

/// Collects diagnostics in memory; the test suite's handler of choice.
#[derive(Default)]
pub struct BufferErrorHandler {
    diags: Vec<Diagnostic>,
    account: ErrorAccount,
}

impl BufferErrorHandler {
    /// Creates an empty buffer handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected diagnostics.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }

    /// True if any collected diagnostic's text contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.diags.iter().any(|d| d.text.contains(needle))
    }
}

impl ErrorHandler for BufferErrorHandler {
    fn emit(&mut self, diag: Diagnostic) {
        self.account.note(diag.level);
        self.diags.push(diag);
    }
    fn nerrors(&self) -> usize {
        self.account.nerrors
    }
    fn nwarnings(&self) -> usize {
        self.account.nwarnings
    }
    fn reset_counts(&mut self) {
        self.account = ErrorAccount::default();
    }
}

/// Prepends a context line to the first diagnostic that passes through.
pub struct ContextErrorHandler {
    inner: Box<dyn ErrorHandler>,
    context: Option<String>,
}

impl ContextErrorHandler {
    /// Creates a veneer that emits `context` once, before the first
    /// forwarded diagnostic.
    pub fn new(inner: Box<dyn ErrorHandler>, context: impl Into<String>) -> Self {
        ContextErrorHandler {
            inner,
            context: Some(context.into()),
        }
    }

    /// Recovers the inner handler.
    pub fn into_inner(self) -> Box<dyn ErrorHandler> {
        self.inner
    }
}

impl ErrorHandler for ContextErrorHandler {
    fn emit(&mut self, diag: Diagnostic) {
        if let Some(context) = self.context.take() {
            self.inner.emit(Diagnostic::new(Level::Info, diag.landmark.clone(), context));
        }
        self.inner.emit(diag);
    }
    fn nerrors(&self) -> usize {
        self.inner.nerrors()
    }
    fn nwarnings(&self) -> usize {
        self.inner.nwarnings()
    }
    fn reset_counts(&mut self) {
        self.inner.reset_counts()
    }
}

/// Prefixes the text of every diagnostic that passes through.
pub struct PrefixErrorHandler {
    inner: Box<dyn ErrorHandler>,
    prefix: String,
}

impl PrefixErrorHandler {
    /// Creates a veneer prefixing every message with `prefix`.
    pub fn new(inner: Box<dyn ErrorHandler>, prefix: impl Into<String>) -> Self {
        PrefixErrorHandler {
            inner,
            prefix: prefix.into(),
        }
    }

    /// Recovers the inner handler.
    pub fn into_inner(self) -> Box<dyn ErrorHandler> {
        self.inner
    }
}

impl ErrorHandler for PrefixErrorHandler {
    fn emit(&mut self, mut diag: Diagnostic) {
        diag.text = format!("{}{}", self.prefix, diag.text);
        self.inner.emit(diag);
    }
    fn nerrors(&self) -> usize {
        self.inner.nerrors()
    }
    fn nwarnings(&self) -> usize {
        self.inner.nwarnings()
    }
    fn reset_counts(&mut self) {
        self.inner.reset_counts()
    }
}

/// Attaches a default landmark to diagnostics that lack one.
pub struct LandmarkErrorHandler {
    inner: Box<dyn ErrorHandler>,
    landmark: Landmark,
}

impl LandmarkErrorHandler {
    /// Creates a veneer applying `landmark` as the default.
    pub fn new(inner: Box<dyn ErrorHandler>, landmark: Landmark) -> Self {
        LandmarkErrorHandler { inner, landmark }
    }

    /// Recovers the inner handler.
    pub fn into_inner(self) -> Box<dyn ErrorHandler> {
        self.inner
    }
}

impl ErrorHandler for LandmarkErrorHandler {
    fn emit(&mut self, mut diag: Diagnostic) {
        if diag.landmark.is_none() {
            diag.landmark = Some(self.landmark.clone());
        }
        self.inner.emit(diag);
    }
    fn nerrors(&self) -> usize {
        self.inner.nerrors()
    }
    fn nwarnings(&self) -> usize {
        self.inner.nwarnings()
    }
    fn reset_counts(&mut self) {
        self.inner.reset_counts()
    }
}

/// Exits the process when a diagnostic at or below a threshold level passes
/// through.
pub struct BailErrorHandler {
    inner: Box<dyn ErrorHandler>,
    threshold: Level,
}

impl BailErrorHandler {
    /// Creates a veneer that exits on diagnostics at `threshold` or worse.
    pub fn new(inner: Box<dyn ErrorHandler>, threshold: Level) -> Self {
        BailErrorHandler { inner, threshold }
    }
}

impl ErrorHandler for BailErrorHandler {
    fn emit(&mut self, diag: Diagnostic) {
        let bail = diag.level <= self.threshold;
        self.inner.emit(diag);
        if bail {
            std::process::exit(1);
        }
    }
    fn nerrors(&self) -> usize {
        self.inner.nerrors()
    }
    fn nwarnings(&self) -> usize {
        self.inner.nwarnings()
    }
    fn reset_counts(&mut self) {
        self.inner.reset_counts()
    }
}
