//! Online reachability verification.
//!
//! L4 readiness says the network is *probably* usable; the verifier
//! confirms it with one active probe, then keeps watching passively:
//! qualifying inbound traffic feeds a Trickle timer, and only repeated
//! trafficless intervals trigger a re-check. Probe failures are never
//! fatal; they just leave the device not-confirmed-online until the
//! next readiness edge.

use crate::config::{CheckStrategy, OnlineCheckConfig};
use crate::error::{ConnMgrError, Result};
use crate::events::ConnEvent;
use crate::manager::ConnMgr;
use crate::probe::HttpTarget;
use crate::trickle::Trickle;
use conn_types::InterfaceId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// HTTP statuses accepted as proof of reachability.
const ONLINE_HTTP_STATUSES: [u16; 2] = [200, 301];

#[derive(Debug, Clone)]
struct CheckSettings {
    strategy: CheckStrategy,
    target: String,
    timeout: Duration,
}

/// Shared state of the online checker (one per manager).
pub struct OnlineChecker {
    enabled: bool,
    settings: Mutex<CheckSettings>,
    /// DNS results for the current target, resolved once.
    resolved: Mutex<Option<Vec<SocketAddr>>>,
    /// Qualifying packets observed since the last transmission point.
    traffic: AtomicU32,
    /// Guards against overlapping check attempts.
    running: AtomicBool,
    online: AtomicBool,
    verifier: Mutex<Option<CancellationToken>>,
    trickle_imin: Duration,
    trickle_doublings: u32,
    trickle_redundancy: u32,
    private_addr_check: bool,
}

impl OnlineChecker {
    pub(crate) fn new(config: &OnlineCheckConfig) -> Self {
        OnlineChecker {
            enabled: config.enabled,
            settings: Mutex::new(CheckSettings {
                strategy: config.strategy,
                target: config.target.clone(),
                timeout: config.probe_timeout(),
            }),
            resolved: Mutex::new(None),
            traffic: AtomicU32::new(0),
            running: AtomicBool::new(false),
            online: AtomicBool::new(false),
            verifier: Mutex::new(None),
            trickle_imin: config.trickle_imin(),
            trickle_doublings: config.trickle_doublings,
            trickle_redundancy: config.trickle_redundancy,
            private_addr_check: config.private_addr_check,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub(crate) fn set_strategy(&self, strategy: CheckStrategy) {
        self.settings.lock().unwrap().strategy = strategy;
    }

    /// Replaces the probe target and drops the resolved-address cache.
    pub(crate) fn set_target(&self, target: String) {
        self.settings.lock().unwrap().target = target;
        self.resolved.lock().unwrap().take();
    }

    /// Counts one qualifying inbound packet for the Trickle verifier.
    pub(crate) fn mark_traffic(&self) {
        self.traffic.fetch_add(1, Ordering::Relaxed);
    }

    fn take_traffic(&self) -> u32 {
        self.traffic.swap(0, Ordering::Relaxed)
    }

    fn settings(&self) -> CheckSettings {
        self.settings.lock().unwrap().clone()
    }

    /// True if a packet from this source counts as evidence of real
    /// connectivity: non-local, non-link-local, and (when the private
    /// address check is on) non-private.
    pub(crate) fn traffic_qualifies(&self, src: IpAddr) -> bool {
        qualifies(src, self.private_addr_check)
    }

    fn new_trickle(&self) -> Trickle {
        Trickle::new(
            self.trickle_imin,
            self.trickle_doublings,
            self.trickle_redundancy,
        )
    }

    /// Installs a fresh verifier token, cancelling any previous one.
    fn arm_verifier(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(old) = self.verifier.lock().unwrap().replace(token.clone()) {
            old.cancel();
        }
        token
    }

    pub(crate) fn cancel_verifier(&self) {
        if let Some(token) = self.verifier.lock().unwrap().take() {
            token.cancel();
        }
    }
}

fn qualifies(src: IpAddr, private_addr_check: bool) -> bool {
    match src {
        IpAddr::V4(v4) => {
            if v4.is_loopback() || v4.is_unspecified() || v4.is_link_local() {
                return false;
            }
            !(private_addr_check && v4.is_private())
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return false;
            }
            // fe80::/10
            if (v6.segments()[0] & 0xffc0) == 0xfe80 {
                return false;
            }
            // fc00::/7 unique-local
            !(private_addr_check && (v6.segments()[0] & 0xfe00) == 0xfc00)
        }
    }
}

/// Consumer task: reacts to aggregate readiness edges.
pub(crate) async fn run(
    mgr: ConnMgr,
    mut events: tokio::sync::broadcast::Receiver<ConnEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            ev = events.recv() => match ev {
                Ok(ev) => ev,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "online checker lagged behind event bus");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            },
        };

        match event {
            ConnEvent::L4Connected(iface) => {
                let checker = mgr.checker();
                if !checker.enabled || checker.is_online() {
                    continue;
                }
                handle_ready(&mgr, iface).await;
            }
            ConnEvent::L4Disconnected(_) => {
                // All readiness gone: tear the verifier down
                // unconditionally and report offline before any
                // further check is attempted.
                let checker = mgr.checker();
                checker.cancel_verifier();
                if checker.online.swap(false, Ordering::SeqCst) {
                    mgr.publish(ConnEvent::Offline);
                }
            }
            _ => {}
        }
    }
}

/// Runs one check attempt attributed to `iface` and arms the verifier
/// on success. No-op if a check is already in flight.
async fn handle_ready(mgr: &ConnMgr, iface: InterfaceId) {
    let checker = mgr.checker();
    if checker
        .running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!(%iface, "online check already running");
        return;
    }

    mgr.set_check_in_flight(iface, true);
    let result = do_online_check(mgr).await;
    mgr.set_check_in_flight(iface, false);
    checker.running.store(false, Ordering::SeqCst);

    match result {
        Ok(()) => {
            checker.online.store(true, Ordering::SeqCst);
            info!(%iface, "connectivity online");
            mgr.publish(ConnEvent::Online(iface));
            let token = checker.arm_verifier();
            tokio::spawn(verify_loop(mgr.clone(), iface, token));
        }
        Err(e) => {
            // Transient by definition; the next readiness edge retries.
            debug!(%iface, error = %e, "online check did not succeed");
        }
    }
}

/// One active reachability probe with the configured strategy.
pub(crate) async fn do_online_check(mgr: &ConnMgr) -> Result<()> {
    let checker = mgr.checker();
    let settings = checker.settings();
    let target = HttpTarget::parse(&settings.target)?;

    match settings.strategy {
        CheckStrategy::Ping => {
            let addr = resolve_cached(mgr, &target).await?;
            mgr.probe().icmp_echo(addr.ip(), settings.timeout).await
        }
        CheckStrategy::Http => {
            let status = mgr.probe().http_get(&target, settings.timeout).await?;
            if ONLINE_HTTP_STATUSES.contains(&status) {
                Ok(())
            } else {
                Err(ConnMgrError::ProbeFailed(format!("HTTP status {status}")))
            }
        }
    }
}

/// Resolves the target host once and caches the result.
async fn resolve_cached(mgr: &ConnMgr, target: &HttpTarget) -> Result<SocketAddr> {
    let checker = mgr.checker();
    if let Some(addrs) = checker.resolved.lock().unwrap().as_ref() {
        if let Some(addr) = addrs.first() {
            return Ok(*addr);
        }
    }

    let addrs = mgr.probe().resolve(&target.host, target.port).await?;
    let first = *addrs
        .first()
        .ok_or_else(|| ConnMgrError::Resolve(target.host.clone()))?;
    *checker.resolved.lock().unwrap() = Some(addrs);
    Ok(first)
}

/// Trickle-paced passive verification.
///
/// Qualifying inbound traffic within an interval suppresses probing
/// and lets the interval double toward Imax. A trafficless interval
/// resets to Imin; a second trafficless interval in a row is treated
/// as suspected loss: report offline, re-run the full check, and
/// either re-arm or give up until the next readiness edge.
async fn verify_loop(mgr: ConnMgr, iface: InterfaceId, token: CancellationToken) {
    let checker = mgr.checker();
    let mut trickle = checker.new_trickle();
    let mut rng = StdRng::from_entropy();
    trickle.begin();

    loop {
        let interval = trickle.interval();
        let t = trickle.pick_t(&mut rng);

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(t) => {}
        }

        let observed = checker.take_traffic();
        trickle.observe(observed);

        if observed == 0 {
            let repeated = trickle.inconsistent();
            if repeated && !trickle.suppressed() {
                info!(%iface, "no traffic for consecutive intervals, re-verifying");
                checker.online.store(false, Ordering::SeqCst);
                mgr.publish(ConnEvent::Offline);

                let result = tokio::select! {
                    _ = token.cancelled() => return,
                    result = do_online_check(&mgr) => result,
                };
                // Readiness may have been lost while the probe was in
                // flight; a cancelled verifier must not resurrect the
                // online state.
                if token.is_cancelled() {
                    return;
                }
                match result {
                    Ok(()) => {
                        checker.online.store(true, Ordering::SeqCst);
                        mgr.publish(ConnEvent::Online(iface));
                        trickle.begin();
                    }
                    Err(e) => {
                        debug!(%iface, error = %e, "re-verification failed, verifier stopping");
                        return;
                    }
                }
            }
            // Interval was reset; start the next one immediately.
            continue;
        }

        let rest = interval.saturating_sub(t);
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(rest) => {}
        }
        trickle.expire();
    }
}
