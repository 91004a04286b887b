//! Named loggers with a per-logger level and an optional application hook.
//!
//! Records that pass the level check go to the hook, if one is installed,
//! and are always forwarded to the [`log`] facade with the logger name as
//! target, so applications keep their own backend (`env_logger`,
//! `tracing-log`, ...).

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, LazyLock, Mutex, RwLock, Weak};

static DEFAULT_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static LOGGERS: LazyLock<Mutex<Vec<Weak<LoggerState>>>> = LazyLock::new(|| Mutex::new(Vec::new()));

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Silent = 4,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Silent => "silent",
        }
    }

    fn facade(self) -> Option<log::Level> {
        Some(match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
            LogLevel::Silent => return None,
        })
    }

    fn from_repr(value: u8) -> Self {
        [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ]
        .get(value as usize)
        .copied()
        .unwrap_or(LogLevel::Silent)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            "silent" | "off" => LogLevel::Silent,
            _ => return Err(LogError::UnknownLevel(s.to_string())),
        };
        Ok(level)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogError {
    UnknownLevel(String),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::UnknownLevel(level) => write!(f, "unknown log level `{level}`"),
        }
    }
}

impl std::error::Error for LogError {}

/// A record handed to the application hook.
#[derive(Clone, Copy, Debug)]
pub struct LogRecord<'a> {
    pub logger: &'a str,
    pub level: LogLevel,
    pub message: &'a str,
}

type LogHook = Arc<dyn Fn(&LogRecord<'_>) + Send + Sync + 'static>;

struct LoggerState {
    name: String,
    level: AtomicU8,
    hook: RwLock<Option<LogHook>>,
}

#[derive(Clone)]
pub struct Logger {
    state: Arc<LoggerState>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.state.name)
            .field("level", &self.level())
            .finish()
    }
}

impl Logger {
    /// Creates a logger starting at the level last passed to [`set_log_level`].
    pub fn new(name: impl Into<String>) -> Self {
        let state = Arc::new(LoggerState {
            name: name.into(),
            level: AtomicU8::new(DEFAULT_LEVEL.load(Ordering::SeqCst)),
            hook: RwLock::new(None),
        });
        if let Ok(mut loggers) = LOGGERS.lock() {
            loggers.push(Arc::downgrade(&state));
        }
        Self { state }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_repr(self.state.level.load(Ordering::SeqCst))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.state.level.store(level as u8, Ordering::SeqCst);
    }

    /// Installs (or with `None` removes) the application hook.
    pub fn set_hook<F>(&self, hook: Option<F>)
    where
        F: Fn(&LogRecord<'_>) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.state.hook.write() {
            *slot = hook.map(|hook| Arc::new(hook) as LogHook);
        }
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message);
    }

    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        let Some(facade) = level.facade() else {
            return;
        };
        if level < self.level() {
            return;
        }
        let message = message.to_string();
        let hook = self.state.hook.read().ok().and_then(|slot| slot.clone());
        if let Some(hook) = hook {
            hook(&LogRecord {
                logger: self.name(),
                level,
                message: &message,
            });
        }
        log::log!(target: self.name(), facade, "{message}");
    }
}

/// Sets the level of every live logger and the starting level of new ones.
pub fn set_log_level(level: LogLevel) {
    DEFAULT_LEVEL.store(level as u8, Ordering::SeqCst);
    if let Ok(mut loggers) = LOGGERS.lock() {
        loggers.retain(|logger| match logger.upgrade() {
            Some(state) => {
                state.level.store(level as u8, Ordering::SeqCst);
                true
            }
            None => false,
        });
    }
}
