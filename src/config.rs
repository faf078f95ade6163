// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide configuration for the promise runtime.
//!
//! The configuration is read on every node allocation, rejection and marshaled
//! continuation. Setting it once at startup is the convention; it is not enforced,
//! and a later [`set_config`] affects work started after the call.

use crate::context::ExecutionContext;
use crate::trace::{TraceHook, TraceLevel};
use crate::{Priority, Rejection};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// The default number of pooled objects kept per type.
pub const DEFAULT_POOL_CAPACITY: usize = 256;

/// Receives rejections that no consumer ever observed.
pub type UncaughtRejectionHandler = Arc<dyn Fn(Rejection) + Send + Sync>;

/// Runtime configuration.
///
/// # Examples
///
/// ```
/// use some_promise::{Config, ConfigBuilder, set_config};
///
/// let config = ConfigBuilder::new()
///     .object_pooling(false)
///     .uncaught_rejection_handler(|rejection| eprintln!("unobserved: {rejection}"))
///     .build();
/// set_config(config);
/// assert!(!some_promise::config().object_pooling());
/// # set_config(Config::default());
/// ```
#[derive(Clone)]
pub struct Config {
    object_pooling: bool,
    pool_capacity: usize,
    progress: bool,
    trace_level: TraceLevel,
    dispatch_priority: Priority,
    uncaught_rejection_handler: Option<UncaughtRejectionHandler>,
    foreground_context: Option<Arc<dyn ExecutionContext>>,
    background_context: Option<Arc<dyn ExecutionContext>>,
    trace_hook: Option<Arc<dyn TraceHook>>,
}

/// A builder for [`Config`].
///
/// Unset values take the defaults described on [`ConfigBuilder::build`].
#[derive(Default, Clone)]
pub struct ConfigBuilder {
    object_pooling: Option<bool>,
    pool_capacity: Option<usize>,
    progress: Option<bool>,
    trace_level: Option<TraceLevel>,
    dispatch_priority: Option<Priority>,
    uncaught_rejection_handler: Option<UncaughtRejectionHandler>,
    foreground_context: Option<Arc<dyn ExecutionContext>>,
    background_context: Option<Arc<dyn ExecutionContext>>,
    trace_hook: Option<Arc<dyn TraceHook>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables reuse of promise nodes.
    ///
    /// Has no effect when the `validation` feature is enabled; pooling is always off there.
    pub fn object_pooling(mut self, enabled: bool) -> Self {
        self.object_pooling = Some(enabled);
        self
    }

    /// The most objects kept in the pool for any one type.
    ///
    /// Only applies to types whose pool has not been created yet.
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = Some(capacity);
        self
    }

    /// Enables or disables progress tracking.
    ///
    /// With progress on, chains deeper than `u16::MAX` are rejected at the chaining
    /// call; with it off, depth saturates silently.
    pub fn progress(mut self, enabled: bool) -> Self {
        self.progress = Some(enabled);
        self
    }

    pub fn trace_level(mut self, level: TraceLevel) -> Self {
        self.trace_level = Some(level);
        self
    }

    pub fn trace_hook(mut self, hook: Arc<dyn TraceHook>) -> Self {
        self.trace_hook = Some(hook);
        self
    }

    /// The priority passed to [`ExecutionContext::post`].
    pub fn dispatch_priority(mut self, priority: Priority) -> Self {
        self.dispatch_priority = Some(priority);
        self
    }

    pub fn uncaught_rejection_handler(
        mut self,
        handler: impl Fn(Rejection) + Send + Sync + 'static,
    ) -> Self {
        self.uncaught_rejection_handler = Some(Arc::new(handler));
        self
    }

    pub fn foreground_context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.foreground_context = Some(context);
        self
    }

    pub fn background_context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.background_context = Some(context);
        self
    }

    /// Builds the final [`Config`].
    ///
    /// Defaults:
    /// - `object_pooling`: `true`
    /// - `pool_capacity`: [`DEFAULT_POOL_CAPACITY`]
    /// - `progress`: `true`
    /// - `trace_level`: [`TraceLevel::None`]
    /// - `dispatch_priority`: `Priority::Unknown`
    /// - no handler, contexts or trace hook
    pub fn build(self) -> Config {
        Config {
            object_pooling: self.object_pooling.unwrap_or(true),
            pool_capacity: self.pool_capacity.unwrap_or(DEFAULT_POOL_CAPACITY),
            progress: self.progress.unwrap_or(true),
            trace_level: self.trace_level.unwrap_or_default(),
            dispatch_priority: self.dispatch_priority.unwrap_or(Priority::Unknown),
            uncaught_rejection_handler: self.uncaught_rejection_handler,
            foreground_context: self.foreground_context,
            background_context: self.background_context,
            trace_hook: self.trace_hook,
        }
    }
}

impl Config {
    pub fn object_pooling(&self) -> bool {
        self.object_pooling
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool_capacity
    }

    pub fn progress(&self) -> bool {
        self.progress
    }

    pub fn trace_level(&self) -> TraceLevel {
        self.trace_level
    }

    pub fn dispatch_priority(&self) -> Priority {
        self.dispatch_priority
    }

    pub fn uncaught_rejection_handler(&self) -> Option<&UncaughtRejectionHandler> {
        self.uncaught_rejection_handler.as_ref()
    }

    pub fn foreground_context(&self) -> Option<&Arc<dyn ExecutionContext>> {
        self.foreground_context.as_ref()
    }

    pub fn background_context(&self) -> Option<&Arc<dyn ExecutionContext>> {
        self.background_context.as_ref()
    }

    pub fn trace_hook(&self) -> Option<&Arc<dyn TraceHook>> {
        self.trace_hook.as_ref()
    }
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("object_pooling", &self.object_pooling)
            .field("pool_capacity", &self.pool_capacity)
            .field("progress", &self.progress)
            .field("trace_level", &self.trace_level)
            .field("dispatch_priority", &self.dispatch_priority)
            .field(
                "uncaught_rejection_handler",
                &self.uncaught_rejection_handler.is_some(),
            )
            .field("foreground_context", &self.foreground_context)
            .field("background_context", &self.background_context)
            .field("trace_hook", &self.trace_hook)
            .finish()
    }
}

static CONFIG: RwLock<Option<Arc<Config>>> = RwLock::new(None);
//mirrors CONFIG so the allocation fast path skips the lock
static POOLING: AtomicBool = AtomicBool::new(true);

/**
Returns the current configuration.

Returns the defaults if [`set_config`] was never called.
*/
pub fn config() -> Arc<Config> {
    let current = CONFIG.read().expect("Config lock poisoned").clone();
    current.unwrap_or_else(|| Arc::new(Config::default()))
}

/**
Replaces the process-wide configuration.

Values that read the configuration after this will see the new value.
*/
pub fn set_config(config: Config) {
    POOLING.store(config.object_pooling, Ordering::Relaxed);
    *CONFIG.write().expect("Config lock poisoned") = Some(Arc::new(config));
}

pub(crate) fn pooling_enabled() -> bool {
    POOLING.load(Ordering::Relaxed)
}

/// Routes a rejection nobody observed to the configured sink.
///
/// Without a handler the rejection is logged, then re-raised as a panic on the
/// foreground (or else background) context if one is configured.
pub(crate) fn report_uncaught(rejection: Rejection) {
    let config = config();
    if let Some(handler) = config.uncaught_rejection_handler() {
        handler(rejection);
        return;
    }
    log::error!("uncaught promise rejection: {rejection:?}");
    let context = config
        .foreground_context()
        .or(config.background_context())
        .cloned();
    if let Some(context) = context {
        context.post(
            config.dispatch_priority(),
            Box::new(move || panic!("uncaught promise rejection: {rejection}")),
        );
    }
}
