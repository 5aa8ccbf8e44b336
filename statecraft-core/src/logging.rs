//! Action logging with pattern-based filtering and in-memory storage
//!
//! [`LoggingMiddleware`] logs every action it sees through `tracing`, filtered
//! by glob patterns, and can also keep a bounded [`ActionLog`] of recent
//! actions for inspection.
//!
//! # Example
//!
//! ```ignore
//! use statecraft::logging::{ActionLogConfig, LoggerConfig, LoggingMiddleware};
//!
//! // Log everything except the polling actions (tracing only)
//! let logger = LoggingMiddleware::new(LoggerConfig::new(None, Some("Poll*")));
//!
//! // Also keep the last 50 actions in memory
//! let logger = LoggingMiddleware::with_log(ActionLogConfig::with_capacity(50));
//! let log = logger.log().expect("storage enabled");
//! let store = Store::builder(reducer).middleware(logger).build(State::default());
//!
//! for entry in log.lock().unwrap().recent(10) {
//!     println!("{}: {}", entry.elapsed_display(), entry.summary);
//! }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::action::Action;
use crate::middleware::{Middleware, MiddlewareApi, Next};

/// Which actions get logged, by glob pattern.
///
/// Patterns support:
/// - `*` matches any sequence of characters
/// - `?` matches any single character
/// - Literal text matches exactly
///
/// # Examples
///
/// - `Cart*` matches CartAdd, CartRemove, etc.
/// - `Did*` matches DidLoad, DidFail, etc.
/// - `*Error*` matches any action containing "Error"
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// If non-empty, only log actions matching these patterns
    pub include_patterns: Vec<String>,
    /// Exclude actions matching these patterns (applied after include)
    pub exclude_patterns: Vec<String>,
}

impl LoggerConfig {
    /// Create a config from comma-separated pattern strings
    ///
    /// # Example
    /// ```
    /// use statecraft_core::logging::LoggerConfig;
    ///
    /// let config = LoggerConfig::new(Some("Cart*,Checkout"), Some("CartTick"));
    /// assert!(config.should_log("CartAdd"));
    /// assert!(config.should_log("Checkout"));
    /// assert!(!config.should_log("CartTick"));
    /// assert!(!config.should_log("Login"));
    /// ```
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        Self {
            include_patterns: include.map(split_patterns).unwrap_or_default(),
            exclude_patterns: exclude.map(split_patterns).unwrap_or_default(),
        }
    }

    /// Create a config with specific pattern vectors
    pub fn with_patterns(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            include_patterns: include,
            exclude_patterns: exclude,
        }
    }

    /// Check if an action name passes the include/exclude patterns
    pub fn should_log(&self, action_name: &str) -> bool {
        if !self.include_patterns.is_empty()
            && !self
                .include_patterns
                .iter()
                .any(|p| glob_match(p, action_name))
        {
            return false;
        }

        !self
            .exclude_patterns
            .iter()
            .any(|p| glob_match(p, action_name))
    }
}

fn split_patterns(patterns: &str) -> Vec<String> {
    patterns
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// An entry in the action log
#[derive(Debug, Clone)]
pub struct ActionLogEntry {
    /// Action name (from Action::name())
    pub name: &'static str,
    /// Debug rendering of the action
    pub summary: String,
    /// When the action reached the logger
    pub timestamp: Instant,
    /// Sequence number for ordering
    pub sequence: u64,
    /// Whether the store state changed, once the rest of the chain returned
    pub state_changed: Option<bool>,
}

impl ActionLogEntry {
    /// Create a new log entry
    pub fn new(name: &'static str, summary: String, sequence: u64) -> Self {
        Self {
            name,
            summary,
            timestamp: Instant::now(),
            sequence,
            state_changed: None,
        }
    }

    /// Time since this action was logged
    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }

    /// Format the elapsed time for display (e.g., "2.3s", "150ms")
    pub fn elapsed_display(&self) -> String {
        let elapsed = self.elapsed();
        if elapsed.as_secs() >= 1 {
            format!("{:.1}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        }
    }
}

/// Configuration for the action log ring buffer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ActionLogConfig {
    /// Maximum number of entries to keep
    pub capacity: usize,
    /// Which actions are stored and traced
    pub filter: LoggerConfig,
}

impl Default for ActionLogConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            filter: LoggerConfig::default(),
        }
    }
}

impl ActionLogConfig {
    /// Create with custom capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Create with custom capacity and filter
    pub fn new(capacity: usize, filter: LoggerConfig) -> Self {
        Self { capacity, filter }
    }
}

/// In-memory ring buffer of recent actions
///
/// Older entries are discarded when capacity is reached.
#[derive(Debug, Clone)]
pub struct ActionLog {
    entries: VecDeque<ActionLogEntry>,
    config: ActionLogConfig,
    next_sequence: u64,
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new(ActionLogConfig::default())
    }
}

impl ActionLog {
    /// Create a new action log with configuration
    pub fn new(config: ActionLogConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(config.capacity),
            config,
            next_sequence: 0,
        }
    }

    /// Log an action if it passes the filter.
    ///
    /// Returns the entry's sequence number, or `None` if filtered out.
    pub fn log<A: Action>(&mut self, action: &A) -> Option<u64> {
        let name = action.name();
        if !self.config.filter.should_log(name) || self.config.capacity == 0 {
            return None;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if self.entries.len() >= self.config.capacity {
            self.entries.pop_front();
        }
        self.entries
            .push_back(ActionLogEntry::new(name, format!("{action:?}"), sequence));
        Some(sequence)
    }

    /// Record whether the action logged as `sequence` changed the state.
    ///
    /// A no-op if the entry was already evicted.
    pub fn mark_state_changed(&mut self, sequence: u64, changed: bool) {
        if let Some(entry) = self.entries.iter_mut().rev().find(|e| e.sequence == sequence) {
            entry.state_changed = Some(changed);
        }
    }

    /// Get all entries (oldest first)
    pub fn entries(&self) -> impl Iterator<Item = &ActionLogEntry> {
        self.entries.iter()
    }

    /// Get the most recent N entries (newest first)
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &ActionLogEntry> {
        self.entries.iter().rev().take(count)
    }

    /// Number of entries currently stored
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Get configuration
    pub fn config(&self) -> &ActionLogConfig {
        &self.config
    }
}

/// Middleware that logs actions with configurable pattern filtering.
///
/// Supports two modes:
/// - **Tracing only** (default): logs via `tracing::debug!()`
/// - **With storage**: also stores entries in a shared [`ActionLog`]
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    config: LoggerConfig,
    log: Option<Arc<Mutex<ActionLog>>>,
    active: bool,
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new(LoggerConfig::default())
    }
}

impl LoggingMiddleware {
    /// Tracing only, no in-memory storage
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            log: None,
            active: true,
        }
    }

    /// Tracing plus in-memory storage
    pub fn with_log(config: ActionLogConfig) -> Self {
        Self {
            config: config.filter.clone(),
            log: Some(Arc::new(Mutex::new(ActionLog::new(config)))),
            active: true,
        }
    }

    /// Set whether the middleware is active.
    ///
    /// An inactive logger does not add a stage to the chain at all, which
    /// suits logging switched on by a CLI flag:
    ///
    /// ```ignore
    /// let logger = LoggingMiddleware::default().active(args.debug);
    /// ```
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Check if the middleware is active.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Shared handle to the action log, if storage is enabled
    pub fn log(&self) -> Option<Arc<Mutex<ActionLog>>> {
        self.log.clone()
    }

    /// Get a reference to the config
    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }
}

impl<S, A, E> Middleware<S, A, E> for LoggingMiddleware
where
    S: Send + Sync + 'static,
    A: Action,
    E: 'static,
{
    fn wrap(&self, api: MiddlewareApi<S, A, E>, next: Next<A>) -> Next<A> {
        if !self.active {
            return next;
        }
        let config = self.config.clone();
        let log = self.log.clone();

        Arc::new(move |action: A| {
            let name = action.name();
            if config.should_log(name) {
                tracing::debug!(action = %name, "action");
            }

            let sequence = log.as_ref().and_then(|log| {
                log.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .log(&action)
            });
            let before = api.state.get();

            let result = next(action);

            if let Err(err) = &result {
                tracing::debug!(action = %name, error = %err, "action failed");
            }
            if let (Some(log), Some(sequence)) = (&log, sequence) {
                let after = api.state.get();
                let changed = match (&before, &after) {
                    (Some(before), Some(after)) => !Arc::ptr_eq(before, after),
                    (None, Some(_)) => true,
                    (_, None) => false,
                };
                log.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .mark_state_changed(sequence, changed);
            }
            result
        })
    }
}

/// Simple glob pattern matching supporting `*` and `?`.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < text.len() {
        match pattern.get(pi) {
            Some('*') => {
                star = Some((pi, ti));
                pi += 1;
            }
            Some(&c) if c == '?' || c == text[ti] => {
                pi += 1;
                ti += 1;
            }
            _ => match star {
                // Let the last star swallow one more character
                Some((star_pi, star_ti)) => {
                    pi = star_pi + 1;
                    ti = star_ti + 1;
                    star = Some((star_pi, star_ti + 1));
                }
                None => return false,
            },
        }
    }

    pattern[pi..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::NoEffect;
    use crate::store::Store;

    #[test]
    fn test_glob_match_exact() {
        assert!(glob_match("Poll", "Poll"));
        assert!(!glob_match("Poll", "Pull"));
        assert!(!glob_match("Poll", "PollNow"));
    }

    #[test]
    fn test_glob_match_star() {
        assert!(glob_match("Cart*", "CartAdd"));
        assert!(glob_match("Cart*", "Cart"));
        assert!(!glob_match("Cart*", "ClearCart"));
        assert!(glob_match("*Cart", "ClearCart"));
        assert!(glob_match("*Cart*", "ClearCartNow"));
        assert!(glob_match("Did*Load*", "DidFinishLoadingItems"));
    }

    #[test]
    fn test_glob_match_question() {
        assert!(glob_match("Tab?", "Tab1"));
        assert!(!glob_match("Tab?", "Tab"));
        assert!(!glob_match("Tab?", "Tab12"));
    }

    #[test]
    fn test_config_include_and_exclude() {
        let config = LoggerConfig::new(Some("Did*"), Some("DidFail*"));
        assert!(config.should_log("DidLoad"));
        assert!(!config.should_log("DidFailLoad"));
        assert!(!config.should_log("Login"));
    }

    #[test]
    fn test_config_default_logs_everything() {
        let config = LoggerConfig::default();
        assert!(config.should_log("Anything"));
        assert_eq!(LoggerConfig::new(Some(" , "), None), config);
    }

    #[test]
    fn test_config_deserialize() {
        let config: ActionLogConfig =
            serde_json::from_str(r#"{ "filter": { "exclude_patterns": ["Poll*"] } }"#).unwrap();
        assert_eq!(config.capacity, 100);
        assert!(!config.filter.should_log("PollServer"));
    }

    #[derive(Clone, Debug)]
    enum TestAction {
        Poll,
        Connect,
    }

    impl Action for TestAction {
        fn name(&self) -> &'static str {
            match self {
                TestAction::Poll => "Poll",
                TestAction::Connect => "Connect",
            }
        }
    }

    #[test]
    fn test_action_log_capacity_and_recent() {
        let mut log = ActionLog::new(ActionLogConfig::with_capacity(3));
        for _ in 0..4 {
            log.log(&TestAction::Connect);
        }
        assert_eq!(log.len(), 3);
        // Sequence 0 was evicted
        assert_eq!(log.entries().next().unwrap().sequence, 1);

        let recent: Vec<_> = log.recent(2).map(|e| e.sequence).collect();
        assert_eq!(recent, vec![3, 2]);
        assert_eq!(log.entries().next().unwrap().summary, "Connect");
    }

    #[test]
    fn test_action_log_filtering() {
        let mut log = ActionLog::new(ActionLogConfig::new(
            10,
            LoggerConfig::new(None, Some("Poll")),
        ));
        assert_eq!(log.log(&TestAction::Poll), None);
        assert_eq!(log.log(&TestAction::Connect), Some(0));
    }

    #[test]
    fn test_middleware_records_state_changes() {
        let logger = LoggingMiddleware::with_log(ActionLogConfig::default());
        let log = logger.log().unwrap();
        let store: Store<u32, TestAction, NoEffect> = Store::builder(
            |action: &TestAction, state: Option<&u32>| {
                let connections = state.copied().unwrap_or(0);
                match action {
                    TestAction::Connect => connections + 1,
                    TestAction::Poll => connections,
                }
            },
        )
        .middleware(logger)
        .build(0);

        store.dispatch_action(TestAction::Connect).unwrap();
        store.dispatch_action(TestAction::Poll).unwrap();

        let log = log.lock().unwrap();
        let changed: Vec<_> = log.entries().map(|e| (e.name, e.state_changed)).collect();
        // The reducer always builds a new state value
        assert_eq!(changed, vec![("Connect", Some(true)), ("Poll", Some(true))]);
    }

    #[test]
    fn test_inactive_middleware_logs_nothing() {
        let logger = LoggingMiddleware::with_log(ActionLogConfig::default()).active(false);
        let log = logger.log().unwrap();
        let store: Store<u32, TestAction, NoEffect> =
            Store::builder(|_: &TestAction, state: Option<&u32>| state.copied().unwrap_or(0))
                .middleware(logger)
                .build(0);

        store.dispatch_action(TestAction::Connect).unwrap();
        assert!(log.lock().unwrap().is_empty());
    }
}
