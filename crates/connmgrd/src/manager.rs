//! The connectivity manager facade.
//!
//! `ConnMgr` owns the state table, the event bus, the bindings and the
//! online checker, and exposes the whole operator API. It is a cheap
//! clone handle around shared state, so timer tasks and the monitor
//! can carry their own copy.

use crate::backend::ConnectivityBackend;
use crate::binding::{BindingConfig, BindingFlag, ConnBinding};
use crate::config::{CheckStrategy, ConnMgrConfig};
use crate::error::{ConnMgrError, Result};
use crate::events::{ConnEvent, EventBus, NetEvent};
use crate::ingest;
use crate::monitor;
use crate::online::{self, OnlineChecker};
use crate::probe::{HttpTarget, ReachabilityProbe, SystemProbe};
use crate::registry::IfaceRegistry;
use crate::state_table::{AggregateEdge, StateTable};
use conn_types::{ConnTimeout, InterfaceId, LinkType};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Shared {
    registry: Arc<dyn IfaceRegistry>,
    probe: Arc<dyn ReachabilityProbe>,
    table: Mutex<StateTable>,
    wake: Notify,
    bus: EventBus,
    bindings: Mutex<HashMap<InterfaceId, Arc<ConnBinding>>>,
    checker: OnlineChecker,
    /// Last published aggregate L4 edge, for late subscribers.
    last_status: Mutex<Option<ConnEvent>>,
    shutdown: CancellationToken,
    started: AtomicBool,
}

/// The connectivity manager. Clone handles freely; all clones share
/// one state.
#[derive(Clone)]
pub struct ConnMgr {
    shared: Arc<Shared>,
}

impl ConnMgr {
    /// Creates a manager over the given registry and probe transport.
    /// No state is persisted; everything is rebuilt by [`resync`]
    /// (which [`start`] runs) from current interface status.
    ///
    /// [`resync`]: ConnMgr::resync
    /// [`start`]: ConnMgr::start
    pub fn new(
        config: &ConnMgrConfig,
        registry: Arc<dyn IfaceRegistry>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        ConnMgr {
            shared: Arc::new(Shared {
                registry,
                probe,
                table: Mutex::new(StateTable::new(config.max_interfaces)),
                wake: Notify::new(),
                bus: EventBus::default(),
                bindings: Mutex::new(HashMap::new()),
                checker: OnlineChecker::new(&config.online_check),
                last_status: Mutex::new(None),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Convenience constructor with the stock sockets-based probe.
    pub fn with_system_probe(config: &ConnMgrConfig, registry: Arc<dyn IfaceRegistry>) -> Self {
        ConnMgr::new(config, registry, Arc::new(SystemProbe::new()))
    }

    /// Associates an interface with a connectivity backend. Fails if
    /// the interface is already bound.
    pub async fn bind(
        &self,
        iface: InterfaceId,
        backend: Arc<dyn ConnectivityBackend>,
        config: BindingConfig,
    ) -> Result<()> {
        {
            let mut bindings = self.shared.bindings.lock().unwrap();
            if bindings.contains_key(&iface) {
                return Err(ConnMgrError::InvalidArgument(format!(
                    "interface {iface} already has a binding"
                )));
            }
            bindings.insert(
                iface,
                Arc::new(ConnBinding::new(iface, backend.clone(), &config)),
            );
        }
        backend.init(iface).await
    }

    /// Spawns the monitor and online-checker tasks and rebuilds the
    /// table from current interface status. Idempotent.
    pub fn start(&self) {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("starting connectivity manager");
        let events = self.shared.bus.subscribe();
        tokio::spawn(monitor::run(self.clone(), self.shared.shutdown.clone()));
        tokio::spawn(online::run(
            self.clone(),
            events,
            self.shared.shutdown.clone(),
        ));
        self.resync();
    }

    /// Stops the background tasks and cancels all pending timers.
    pub fn shutdown(&self) {
        info!("shutting down connectivity manager");
        self.shared.shutdown.cancel();
        self.shared.checker.cancel_verifier();
        for binding in self.shared.bindings.lock().unwrap().values() {
            binding.cancel_idle_timer();
            binding.cancel_connect_watchdog();
        }
    }

    /// Subscribes to aggregate connectivity events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnEvent> {
        self.shared.bus.subscribe()
    }

    /// Rebuilds raw state bits from the registry's current view and
    /// wakes the monitor. All slots are recomputed.
    pub fn resync(&self) {
        {
            let mut table = self.shared.table.lock().unwrap();
            for iface in self.shared.registry.interfaces() {
                let Some(slot) = table.slot_mut(iface) else {
                    warn!(%iface, "interface beyond table capacity, not managed");
                    continue;
                };
                slot.admin_up = self.shared.registry.is_oper_up(iface);
                slot.ipv4 = self
                    .shared
                    .registry
                    .has_global_addr(iface, conn_types::AddressFamily::Ipv4);
                slot.ipv6 = self
                    .shared
                    .registry
                    .has_global_addr(iface, conn_types::AddressFamily::Ipv6);
                slot.changed = true;
            }
        }
        self.shared.wake.notify_one();
    }

    // --- Event ingestion -------------------------------------------------

    /// Ingests one raw interface event: folds it into the state table,
    /// wakes the monitor if anything changed, and runs the binding
    /// layer's automatic behaviors. Never fails; errors inside
    /// automatic behaviors are logged and swallowed.
    pub async fn handle_net_event(&self, event: NetEvent) {
        let mutated = {
            let mut table = self.shared.table.lock().unwrap();
            ingest::apply_net_event(&mut table, self.shared.registry.as_ref(), &event)
        };
        if mutated {
            self.shared.wake.notify_one();
        }

        match event {
            NetEvent::IfaceAdminUp(iface) => self.auto_connect(iface).await,
            NetEvent::IfaceUp(iface) => self.on_oper_up(iface),
            NetEvent::IfaceDown(iface) => self.on_oper_down(iface).await,
            _ => {}
        }
    }

    /// Admin-up on a bound interface triggers connect unless opted out.
    async fn auto_connect(&self, iface: InterfaceId) {
        let Some(binding) = self.try_binding(iface) else {
            return;
        };
        if binding.flag(BindingFlag::NoAutoConnect) {
            return;
        }
        debug!(%iface, "auto-connecting on admin-up");
        if let Err(e) = self.connect(iface).await {
            warn!(%iface, error = %e, "auto-connect failed");
        }
    }

    /// Carrier established: the connect attempt succeeded, so stop the
    /// watchdog, and start counting idle time.
    fn on_oper_up(&self, iface: InterfaceId) {
        let Some(binding) = self.try_binding(iface) else {
            return;
        };
        binding.cancel_connect_watchdog();
        self.schedule_idle(&binding);
    }

    /// Carrier lost. Persistent bindings are expected to retry on
    /// their own unless the disconnect was operator-initiated; anyone
    /// else gets their idle timer cancelled and, unless opted out, the
    /// interface taken administratively down.
    async fn on_oper_down(&self, iface: InterfaceId) {
        let Some(binding) = self.try_binding(iface) else {
            return;
        };
        binding.cancel_connect_watchdog();

        let disconnecting = binding.flag(BindingFlag::Disconnecting);
        if binding.flag(BindingFlag::Persistent) && !disconnecting {
            debug!(%iface, "persistent binding lost carrier, expecting backend retry");
            return;
        }

        binding.cancel_idle_timer();
        if !binding.flag(BindingFlag::NoAutoDown) {
            if let Err(e) = self.shared.registry.set_admin_down(iface).await {
                warn!(%iface, error = %e, "automatic admin-down failed");
            }
        }
        binding.set_flag(BindingFlag::Disconnecting, false);
    }

    // --- Binding operations ----------------------------------------------

    /// Connects the interface through its backend, bringing it
    /// administratively up first if needed.
    pub async fn connect(&self, iface: InterfaceId) -> Result<()> {
        let binding = self.binding(iface)?;
        let _ops = binding.lock_ops().await;

        if !self.shared.registry.is_admin_up(iface) {
            self.shared.registry.set_admin_up(iface).await?;
        }
        binding.set_flag(BindingFlag::Disconnecting, false);
        self.start_connect_watchdog(&binding);

        let result = binding.backend().connect(iface).await;
        if result.is_err() {
            // The caller already sees the failure; there is no attempt
            // left for the watchdog to time out.
            binding.cancel_connect_watchdog();
        }
        result
    }

    /// Operator-initiated disconnect.
    pub async fn disconnect(&self, iface: InterfaceId) -> Result<()> {
        self.disconnect_inner(iface, false).await
    }

    /// `from_idle` marks a disconnect requested by the idle timer, so
    /// the oper-down that follows is not mistaken for an operator
    /// action (a persistent binding may reconnect afterwards).
    async fn disconnect_inner(&self, iface: InterfaceId, from_idle: bool) -> Result<()> {
        let binding = self.binding(iface)?;
        let _ops = binding.lock_ops().await;

        if !self.shared.registry.is_admin_up(iface) {
            // Nothing to tear down.
            return Ok(());
        }
        if !from_idle {
            binding.set_flag(BindingFlag::Disconnecting, true);
        }
        binding.cancel_idle_timer();
        binding.cancel_connect_watchdog();

        binding.backend().disconnect(iface).await
    }

    /// Reads a backend option under the binding lock.
    pub async fn get_option(&self, iface: InterfaceId, name: &str) -> Result<String> {
        let binding = self.binding(iface)?;
        ConnBinding::validate_option_name(name)?;
        let _ops = binding.lock_ops().await;
        binding.backend().get_option(iface, name).await
    }

    /// Writes a backend option under the binding lock.
    pub async fn set_option(&self, iface: InterfaceId, name: &str, value: &str) -> Result<()> {
        let binding = self.binding(iface)?;
        ConnBinding::validate_option_name(name)?;
        let _ops = binding.lock_ops().await;
        binding.backend().set_option(iface, name, value).await
    }

    pub fn get_flag(&self, iface: InterfaceId, flag: BindingFlag) -> Result<bool> {
        Ok(self.binding(iface)?.flag(flag))
    }

    pub fn set_flag(&self, iface: InterfaceId, flag: BindingFlag, value: bool) -> Result<()> {
        self.binding(iface)?.set_flag(flag, value);
        Ok(())
    }

    pub fn connect_timeout(&self, iface: InterfaceId) -> Result<ConnTimeout> {
        Ok(self.binding(iface)?.connect_timeout())
    }

    pub fn set_connect_timeout(&self, iface: InterfaceId, timeout: ConnTimeout) -> Result<()> {
        self.binding(iface)?.set_connect_timeout(timeout);
        Ok(())
    }

    pub fn idle_timeout(&self, iface: InterfaceId) -> Result<ConnTimeout> {
        Ok(self.binding(iface)?.idle_timeout())
    }

    /// Stores a new idle timeout. The timer itself is (re)armed on the
    /// next [`used`] signal or oper-up transition.
    ///
    /// [`used`]: ConnMgr::used
    pub fn set_idle_timeout(&self, iface: InterfaceId, timeout: ConnTimeout) -> Result<()> {
        self.binding(iface)?.set_idle_timeout(timeout);
        Ok(())
    }

    /// Signals that traffic used this interface: pushes the idle
    /// disconnect another idle-timeout into the future. No-op for
    /// unbound interfaces or an unset idle timeout.
    pub fn used(&self, iface: InterfaceId) {
        if let Some(binding) = self.try_binding(iface) {
            self.schedule_idle(&binding);
        }
    }

    fn schedule_idle(&self, binding: &Arc<ConnBinding>) {
        let Some(timeout) = binding.idle_timeout().as_duration() else {
            return;
        };
        let token = binding.arm_idle_timer();
        let mgr = self.clone();
        let iface = binding.iface();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    debug!(%iface, "idle timeout fired, requesting disconnect");
                    if let Err(e) = mgr.disconnect_inner(iface, true).await {
                        warn!(%iface, error = %e, "idle disconnect failed");
                    }
                }
            }
        });
    }

    fn start_connect_watchdog(&self, binding: &Arc<ConnBinding>) {
        let Some(timeout) = binding.connect_timeout().as_duration() else {
            return;
        };
        let token = binding.arm_connect_watchdog();
        let mgr = self.clone();
        let iface = binding.iface();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if !mgr.shared.registry.is_oper_up(iface) {
                        mgr.report_timeout(iface).await;
                    }
                }
            }
        });
    }

    /// Records a backend-reported connect timeout: publish the event,
    /// then stop expecting a reconnection.
    pub async fn report_timeout(&self, iface: InterfaceId) {
        warn!(%iface, "connect attempt timed out");
        self.publish(ConnEvent::IfTimeout(iface));
        self.give_up(iface).await;
    }

    /// Records a fatal backend error: publish the event, then stop
    /// expecting a reconnection.
    pub async fn report_fatal_error(&self, iface: InterfaceId, code: i32) {
        error!(%iface, code, "backend reported fatal error");
        self.publish(ConnEvent::IfFatalError { iface, code });
        self.give_up(iface).await;
    }

    /// The "will not reconnect" path shared by fatal errors and
    /// connect timeouts: cancel timers and take the interface down
    /// unless opted out.
    async fn give_up(&self, iface: InterfaceId) {
        let Some(binding) = self.try_binding(iface) else {
            return;
        };
        binding.cancel_idle_timer();
        binding.cancel_connect_watchdog();
        if !binding.flag(BindingFlag::NoAutoDown) {
            if let Err(e) = self.shared.registry.set_admin_down(iface).await {
                warn!(%iface, error = %e, "admin-down after fatal condition failed");
            }
        }
    }

    // --- Ignore / watch ---------------------------------------------------

    /// Excludes the interface from readiness aggregation. Idempotent.
    pub fn ignore_iface(&self, iface: InterfaceId) {
        self.set_ignored(iface, true);
    }

    /// Re-includes the interface in readiness aggregation. Idempotent.
    pub fn watch_iface(&self, iface: InterfaceId) {
        self.set_ignored(iface, false);
    }

    fn set_ignored(&self, iface: InterfaceId, ignored: bool) {
        {
            let mut table = self.shared.table.lock().unwrap();
            let Some(slot) = table.slot_mut(iface) else {
                return;
            };
            slot.ignored = ignored;
            slot.changed = true;
        }
        if ignored {
            // A stale idle timer must not fire for an iface we no
            // longer aggregate.
            if let Some(binding) = self.try_binding(iface) {
                binding.cancel_idle_timer();
            }
        }
        self.shared.wake.notify_one();
    }

    /// Ignores every interface of the given link technology.
    pub fn ignore_l2(&self, link_type: LinkType) {
        for iface in self.ifaces_of_type(link_type) {
            self.ignore_iface(iface);
        }
    }

    /// Watches every interface of the given link technology.
    pub fn watch_l2(&self, link_type: LinkType) {
        for iface in self.ifaces_of_type(link_type) {
            self.watch_iface(iface);
        }
    }

    fn ifaces_of_type(&self, link_type: LinkType) -> Vec<InterfaceId> {
        self.shared
            .registry
            .interfaces()
            .into_iter()
            .filter(|i| self.shared.registry.link_type(*i) == Some(link_type))
            .collect()
    }

    // --- Bulk operations ---------------------------------------------------

    /// Takes all interfaces administratively up. Per-interface
    /// failures are logged and skipped.
    pub async fn all_up(&self, skip_ignored: bool) {
        for iface in self.bulk_targets(skip_ignored) {
            if let Err(e) = self.shared.registry.set_admin_up(iface).await {
                warn!(%iface, error = %e, "all-up: admin-up failed");
            }
        }
    }

    /// Takes all interfaces administratively down.
    pub async fn all_down(&self, skip_ignored: bool) {
        for iface in self.bulk_targets(skip_ignored) {
            if let Err(e) = self.shared.registry.set_admin_down(iface).await {
                warn!(%iface, error = %e, "all-down: admin-down failed");
            }
        }
    }

    /// Connects every bound interface.
    pub async fn all_connect(&self, skip_ignored: bool) {
        for iface in self.bulk_targets(skip_ignored) {
            match self.connect(iface).await {
                Ok(()) | Err(ConnMgrError::NotSupported) => {}
                Err(e) => warn!(%iface, error = %e, "all-connect failed"),
            }
        }
    }

    /// Disconnects every bound interface.
    pub async fn all_disconnect(&self, skip_ignored: bool) {
        for iface in self.bulk_targets(skip_ignored) {
            match self.disconnect(iface).await {
                Ok(()) | Err(ConnMgrError::NotSupported) => {}
                Err(e) => warn!(%iface, error = %e, "all-disconnect failed"),
            }
        }
    }

    fn bulk_targets(&self, skip_ignored: bool) -> Vec<InterfaceId> {
        let table = self.shared.table.lock().unwrap();
        self.shared
            .registry
            .interfaces()
            .into_iter()
            .filter(|i| !skip_ignored || !table.slot(*i).map(|s| s.ignored).unwrap_or(false))
            .collect()
    }

    // --- Status and online checking ----------------------------------------

    /// Re-publishes the last aggregate L4 event for late subscribers.
    /// No recomputation happens.
    pub fn resend_status(&self) {
        if let Some(event) = *self.shared.last_status.lock().unwrap() {
            self.publish(event);
        }
    }

    /// True if at least one interface currently contributes to
    /// readiness.
    pub fn is_l4_ready(&self) -> bool {
        self.shared.table.lock().unwrap().ready_count() > 0
    }

    pub fn ready_count(&self) -> usize {
        self.shared.table.lock().unwrap().ready_count()
    }

    /// True if the last reachability verification succeeded and has
    /// not been invalidated since.
    pub fn is_online(&self) -> bool {
        self.shared.checker.is_online()
    }

    pub fn set_online_check_strategy(&self, strategy: CheckStrategy) {
        self.shared.checker.set_strategy(strategy);
    }

    /// Replaces the online-check target after validating it.
    pub fn set_online_check_target(&self, target: &str) -> Result<()> {
        HttpTarget::parse(target)?;
        self.shared.checker.set_target(target.to_string());
        Ok(())
    }

    /// Runs one online check immediately with the configured strategy,
    /// without touching the verifier state machine.
    pub async fn run_online_check(&self) -> Result<()> {
        online::do_online_check(self).await
    }

    /// Feeds one observed inbound packet to the Trickle verifier.
    /// Only qualifying sources on currently-ready interfaces count.
    pub fn notify_rx_packet(&self, iface: InterfaceId, src: IpAddr) {
        if !self.shared.checker.traffic_qualifies(src) {
            return;
        }
        let ready = self
            .shared
            .table
            .lock()
            .unwrap()
            .slot(iface)
            .map(|s| s.ready)
            .unwrap_or(false);
        if ready {
            self.shared.checker.mark_traffic();
        }
    }

    // --- Internals shared with monitor/online ------------------------------

    fn binding(&self, iface: InterfaceId) -> Result<Arc<ConnBinding>> {
        self.try_binding(iface).ok_or(ConnMgrError::NotSupported)
    }

    fn try_binding(&self, iface: InterfaceId) -> Option<Arc<ConnBinding>> {
        self.shared.bindings.lock().unwrap().get(&iface).cloned()
    }

    pub(crate) fn wake_signal(&self) -> &Notify {
        &self.shared.wake
    }

    pub(crate) fn checker(&self) -> &OnlineChecker {
        &self.shared.checker
    }

    pub(crate) fn probe(&self) -> &Arc<dyn ReachabilityProbe> {
        &self.shared.probe
    }

    pub(crate) fn publish(&self, event: ConnEvent) {
        self.shared.bus.publish(event);
    }

    pub(crate) fn set_check_in_flight(&self, iface: InterfaceId, in_flight: bool) {
        if let Some(slot) = self.shared.table.lock().unwrap().slot_mut(iface) {
            slot.online_check_in_flight = in_flight;
        }
    }

    /// One monitor pass: rescan changed slots under the lock, then
    /// publish the coalesced edges outside it.
    pub(crate) fn process_changes(&self) {
        let outcome = self.shared.table.lock().unwrap().rescan();
        if outcome.is_empty() {
            return;
        }

        if let Some(edge) = outcome.l4 {
            let event = match edge {
                AggregateEdge::Connected(i) => ConnEvent::L4Connected(i),
                AggregateEdge::Disconnected(i) => ConnEvent::L4Disconnected(i),
            };
            *self.shared.last_status.lock().unwrap() = Some(event);
            self.publish(event);
        }
        if let Some(edge) = outcome.ipv4 {
            self.publish(match edge {
                AggregateEdge::Connected(i) => ConnEvent::Ipv4Connected(i),
                AggregateEdge::Disconnected(i) => ConnEvent::Ipv4Disconnected(i),
            });
        }
        if let Some(edge) = outcome.ipv6 {
            self.publish(match edge {
                AggregateEdge::Connected(i) => ConnEvent::Ipv6Connected(i),
                AggregateEdge::Disconnected(i) => ConnEvent::Ipv6Disconnected(i),
            });
        }
    }
}
