//! Connectivity bindings: the association between one interface and
//! one pluggable backend, plus the binding-scoped flags and timers.
//!
//! Backend calls are serialized per binding by an async lock; the
//! flags/timeouts live behind a separate short-held sync lock so that
//! a slow backend never blocks accessors.

use crate::backend::ConnectivityBackend;
use crate::error::{ConnMgrError, Result};
use conn_types::{ConnTimeout, InterfaceId};
use std::sync::Arc;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Binding-scoped behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingFlag {
    /// The backend retries on its own after unexpected connection
    /// loss; the manager must not take the interface down.
    Persistent,
    /// Do not automatically connect when the interface goes admin-up.
    NoAutoConnect,
    /// Never take the interface administratively down, even on fatal
    /// backend errors.
    NoAutoDown,
    /// The current/most recent disconnect was operator-initiated, so a
    /// following oper-down is expected, not a loss.
    Disconnecting,
}

impl BindingFlag {
    /// Translates a raw numeric flag id as used by external callers.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(BindingFlag::Persistent),
            1 => Some(BindingFlag::NoAutoConnect),
            2 => Some(BindingFlag::NoAutoDown),
            3 => Some(BindingFlag::Disconnecting),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BindingFlags {
    persistent: bool,
    no_auto_connect: bool,
    no_auto_down: bool,
    disconnecting: bool,
}

impl BindingFlags {
    fn get(&self, flag: BindingFlag) -> bool {
        match flag {
            BindingFlag::Persistent => self.persistent,
            BindingFlag::NoAutoConnect => self.no_auto_connect,
            BindingFlag::NoAutoDown => self.no_auto_down,
            BindingFlag::Disconnecting => self.disconnecting,
        }
    }

    fn set(&mut self, flag: BindingFlag, value: bool) {
        match flag {
            BindingFlag::Persistent => self.persistent = value,
            BindingFlag::NoAutoConnect => self.no_auto_connect = value,
            BindingFlag::NoAutoDown => self.no_auto_down = value,
            BindingFlag::Disconnecting => self.disconnecting = value,
        }
    }
}

/// Initial configuration for one binding.
#[derive(Debug, Clone, Default)]
pub struct BindingConfig {
    pub connect_timeout: ConnTimeout,
    pub idle_timeout: ConnTimeout,
    pub persistent: bool,
    pub no_auto_connect: bool,
    pub no_auto_down: bool,
}

#[derive(Debug, Default)]
struct BindingState {
    flags: BindingFlags,
    connect_timeout: ConnTimeout,
    idle_timeout: ConnTimeout,
    idle_task: Option<CancellationToken>,
    connect_watchdog: Option<CancellationToken>,
}

/// One interface's association with a connectivity backend.
pub struct ConnBinding {
    iface: InterfaceId,
    backend: Arc<dyn ConnectivityBackend>,
    /// Serializes connect/disconnect/option calls into the backend.
    /// Never held while the table lock is held.
    op_lock: tokio::sync::Mutex<()>,
    state: Mutex<BindingState>,
}

impl ConnBinding {
    pub fn new(
        iface: InterfaceId,
        backend: Arc<dyn ConnectivityBackend>,
        config: &BindingConfig,
    ) -> Self {
        let flags = BindingFlags {
            persistent: config.persistent,
            no_auto_connect: config.no_auto_connect,
            no_auto_down: config.no_auto_down,
            disconnecting: false,
        };
        ConnBinding {
            iface,
            backend,
            op_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(BindingState {
                flags,
                connect_timeout: config.connect_timeout,
                idle_timeout: config.idle_timeout,
                ..BindingState::default()
            }),
        }
    }

    pub fn iface(&self) -> InterfaceId {
        self.iface
    }

    pub fn backend(&self) -> &Arc<dyn ConnectivityBackend> {
        &self.backend
    }

    /// Acquires the per-binding operation lock.
    pub async fn lock_ops(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.op_lock.lock().await
    }

    pub fn flag(&self, flag: BindingFlag) -> bool {
        self.state.lock().unwrap().flags.get(flag)
    }

    pub fn set_flag(&self, flag: BindingFlag, value: bool) {
        self.state.lock().unwrap().flags.set(flag, value);
    }

    pub fn connect_timeout(&self) -> ConnTimeout {
        self.state.lock().unwrap().connect_timeout
    }

    pub fn set_connect_timeout(&self, timeout: ConnTimeout) {
        self.state.lock().unwrap().connect_timeout = timeout;
    }

    pub fn idle_timeout(&self) -> ConnTimeout {
        self.state.lock().unwrap().idle_timeout
    }

    /// Stores a new idle timeout. Does not (re)arm the idle timer by
    /// itself; arming happens on the next `used()` signal or oper-up.
    pub fn set_idle_timeout(&self, timeout: ConnTimeout) {
        self.state.lock().unwrap().idle_timeout = timeout;
    }

    /// Cancels any pending idle timer and installs the new token,
    /// returning it for the caller's timer task.
    pub fn arm_idle_timer(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut state = self.state.lock().unwrap();
        if let Some(old) = state.idle_task.replace(token.clone()) {
            old.cancel();
        }
        token
    }

    pub fn cancel_idle_timer(&self) {
        if let Some(token) = self.state.lock().unwrap().idle_task.take() {
            token.cancel();
        }
    }

    /// Cancels any running connect-timeout watchdog and installs the
    /// new token.
    pub fn arm_connect_watchdog(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut state = self.state.lock().unwrap();
        if let Some(old) = state.connect_watchdog.replace(token.clone()) {
            old.cancel();
        }
        token
    }

    pub fn cancel_connect_watchdog(&self) {
        if let Some(token) = self.state.lock().unwrap().connect_watchdog.take() {
            token.cancel();
        }
    }

    /// Validates an option name before handing it to the backend.
    pub fn validate_option_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(ConnMgrError::InvalidArgument(
                "empty option name".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnBinding")
            .field("iface", &self.iface)
            .finish_non_exhaustive()
    }
}
