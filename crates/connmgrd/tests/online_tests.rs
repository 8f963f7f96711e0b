//! Integration tests for the online reachability verifier: the
//! check-on-ready cycle, Trickle-paced re-verification and teardown
//! on readiness loss.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use connmgrd::{
    CheckStrategy, ConnEvent, ConnMgr, ConnMgrConfig, ConnMgrError, HttpTarget, InMemoryRegistry,
    NetEvent, ReachabilityProbe, Result,
};
use conn_types::{AddressFamily, InterfaceId, LinkType};
use tokio::sync::broadcast;

/// Probe answering from canned state, recording call counts.
struct StubProbe {
    http_status: AtomicU16,
    http_calls: AtomicUsize,
    resolve_calls: AtomicUsize,
    echo_calls: AtomicUsize,
}

impl StubProbe {
    fn new(status: u16) -> Arc<Self> {
        Arc::new(StubProbe {
            http_status: AtomicU16::new(status),
            http_calls: AtomicUsize::new(0),
            resolve_calls: AtomicUsize::new(0),
            echo_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl ReachabilityProbe for StubProbe {
    async fn resolve(&self, _host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![SocketAddr::new("192.0.2.1".parse().unwrap(), port)])
    }

    async fn icmp_echo(&self, _addr: IpAddr, _timeout: Duration) -> Result<()> {
        self.echo_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn http_get(&self, _target: &HttpTarget, _timeout: Duration) -> Result<u16> {
        self.http_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.http_status.load(Ordering::SeqCst))
    }
}

/// Probe whose HTTP responses can be held open until released.
struct GatedProbe {
    gated: AtomicBool,
    release: tokio::sync::Notify,
    http_calls: AtomicUsize,
}

impl GatedProbe {
    fn new() -> Arc<Self> {
        Arc::new(GatedProbe {
            gated: AtomicBool::new(false),
            release: tokio::sync::Notify::new(),
            http_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl ReachabilityProbe for GatedProbe {
    async fn resolve(&self, _host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        Ok(vec![SocketAddr::new("192.0.2.1".parse().unwrap(), port)])
    }

    async fn icmp_echo(&self, _addr: IpAddr, _timeout: Duration) -> Result<()> {
        Err(ConnMgrError::NotSupported)
    }

    async fn http_get(&self, _target: &HttpTarget, _timeout: Duration) -> Result<u16> {
        self.http_calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        Ok(200)
    }
}

fn id(n: u32) -> InterfaceId {
    InterfaceId::new(n).unwrap()
}

/// Verifier-friendly config: 1 s constant Trickle intervals.
fn config() -> ConnMgrConfig {
    let mut config = ConnMgrConfig::default();
    config.online_check.trickle_imin_ms = 1_000;
    config.online_check.trickle_doublings = 0;
    config
}

fn setup(config: &ConnMgrConfig, probe: Arc<dyn ReachabilityProbe>) -> (ConnMgr, Arc<InMemoryRegistry>) {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.add_interface(id(1), LinkType::Ethernet);
    let mgr = ConnMgr::new(config, registry.clone(), probe);
    (mgr, registry)
}

/// Brings if1 to readiness and consumes the two aggregate edges.
async fn make_ready(
    mgr: &ConnMgr,
    registry: &InMemoryRegistry,
    rx: &mut broadcast::Receiver<ConnEvent>,
) {
    registry.set_addr_count(id(1), AddressFamily::Ipv4, 1);
    mgr.handle_net_event(NetEvent::AddrAdded {
        iface: id(1),
        family: AddressFamily::Ipv4,
    })
    .await;
    mgr.handle_net_event(NetEvent::IfaceUp(id(1))).await;
    assert_eq!(recv(rx).await, ConnEvent::L4Connected(id(1)));
    assert_eq!(recv(rx).await, ConnEvent::Ipv4Connected(id(1)));
}

async fn recv(rx: &mut broadcast::Receiver<ConnEvent>) -> ConnEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

async fn assert_no_event(rx: &mut broadcast::Receiver<ConnEvent>) {
    if let Ok(ev) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        panic!("unexpected event: {:?}", ev.unwrap());
    }
}

#[tokio::test(start_paused = true)]
async fn test_online_follows_successful_check() {
    let probe = StubProbe::new(200);
    let (mgr, registry) = setup(&config(), probe.clone());
    mgr.start();
    let mut rx = mgr.subscribe();

    assert!(!mgr.is_online());
    make_ready(&mgr, &registry, &mut rx).await;

    assert_eq!(recv(&mut rx).await, ConnEvent::Online(id(1)));
    assert!(mgr.is_online());
    assert_eq!(probe.http_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_check_stays_not_online() {
    let probe = StubProbe::new(404);
    let (mgr, registry) = setup(&config(), probe.clone());
    mgr.start();
    let mut rx = mgr.subscribe();

    make_ready(&mgr, &registry, &mut rx).await;

    assert_no_event(&mut rx).await;
    assert!(!mgr.is_online());
    assert_eq!(probe.http_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_checker_never_probes() {
    let probe = StubProbe::new(200);
    let mut config = config();
    config.online_check.enabled = false;
    let (mgr, registry) = setup(&config, probe.clone());
    mgr.start();
    let mut rx = mgr.subscribe();

    make_ready(&mgr, &registry, &mut rx).await;

    assert_no_event(&mut rx).await;
    assert!(!mgr.is_online());
    assert_eq!(probe.http_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_readiness_loss_reports_offline() {
    let probe = StubProbe::new(200);
    let (mgr, registry) = setup(&config(), probe.clone());
    mgr.start();
    let mut rx = mgr.subscribe();

    make_ready(&mgr, &registry, &mut rx).await;
    assert_eq!(recv(&mut rx).await, ConnEvent::Online(id(1)));

    mgr.handle_net_event(NetEvent::IfaceDown(id(1))).await;
    assert_eq!(recv(&mut rx).await, ConnEvent::L4Disconnected(id(1)));
    assert_eq!(recv(&mut rx).await, ConnEvent::Ipv4Disconnected(id(1)));
    assert_eq!(recv(&mut rx).await, ConnEvent::Offline);
    assert!(!mgr.is_online());
}

#[tokio::test(start_paused = true)]
async fn test_readiness_loss_discards_in_flight_recheck() {
    let probe = GatedProbe::new();
    let (mgr, registry) = setup(&config(), probe.clone());
    mgr.start();
    let mut rx = mgr.subscribe();

    make_ready(&mgr, &registry, &mut rx).await;
    assert_eq!(recv(&mut rx).await, ConnEvent::Online(id(1)));

    // Hold the next probe open, then let the verifier fire on silence.
    probe.gated.store(true, Ordering::SeqCst);
    assert_eq!(recv(&mut rx).await, ConnEvent::Offline);
    assert_eq!(probe.http_calls.load(Ordering::SeqCst), 2);

    // All readiness is lost while that re-check is still in flight.
    mgr.handle_net_event(NetEvent::IfaceDown(id(1))).await;
    assert_eq!(recv(&mut rx).await, ConnEvent::L4Disconnected(id(1)));
    assert_eq!(recv(&mut rx).await, ConnEvent::Ipv4Disconnected(id(1)));

    // Releasing the stale probe must not resurrect the online state.
    probe.release.notify_one();
    assert_no_event(&mut rx).await;
    assert!(!mgr.is_online());
}

#[tokio::test(start_paused = true)]
async fn test_verifier_trafficless_recheck_cycle() {
    let probe = StubProbe::new(200);
    let (mgr, registry) = setup(&config(), probe.clone());
    mgr.start();
    let mut rx = mgr.subscribe();
    let src: IpAddr = "203.0.113.5".parse().unwrap();

    make_ready(&mgr, &registry, &mut rx).await;
    assert_eq!(recv(&mut rx).await, ConnEvent::Online(id(1)));
    assert_eq!(probe.http_calls.load(Ordering::SeqCst), 1);

    // Steady inbound traffic keeps every Trickle interval consistent;
    // no re-check happens.
    for _ in 0..8 {
        mgr.notify_rx_packet(id(1), src);
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    assert_eq!(probe.http_calls.load(Ordering::SeqCst), 1);
    assert!(mgr.is_online());

    // Traffic stops: the next trafficless interval reports offline and
    // re-runs the active check, which still succeeds.
    assert_eq!(recv(&mut rx).await, ConnEvent::Offline);
    assert_eq!(recv(&mut rx).await, ConnEvent::Online(id(1)));
    assert_eq!(probe.http_calls.load(Ordering::SeqCst), 2);
    assert!(mgr.is_online());

    // Traffic resumes: the verifier goes quiet again.
    for _ in 0..8 {
        mgr.notify_rx_packet(id(1), src);
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    assert_eq!(probe.http_calls.load(Ordering::SeqCst), 2);
    assert!(mgr.is_online());
}

#[tokio::test(start_paused = true)]
async fn test_verifier_stops_after_failed_recheck() {
    let probe = StubProbe::new(200);
    let (mgr, registry) = setup(&config(), probe.clone());
    mgr.start();
    let mut rx = mgr.subscribe();

    make_ready(&mgr, &registry, &mut rx).await;
    assert_eq!(recv(&mut rx).await, ConnEvent::Online(id(1)));

    // The re-check after silence now fails; the verifier reports
    // offline once and stops until the next readiness edge.
    probe.http_status.store(503, Ordering::SeqCst);
    assert_eq!(recv(&mut rx).await, ConnEvent::Offline);
    assert!(!mgr.is_online());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_no_event(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn test_non_qualifying_traffic_does_not_suppress() {
    let probe = StubProbe::new(200);
    let (mgr, registry) = setup(&config(), probe.clone());
    mgr.start();
    let mut rx = mgr.subscribe();

    make_ready(&mgr, &registry, &mut rx).await;
    assert_eq!(recv(&mut rx).await, ConnEvent::Online(id(1)));

    // Loopback and link-local sources carry no evidence; the verifier
    // still sees silence and re-checks.
    let loopback: IpAddr = "127.0.0.1".parse().unwrap();
    let link_local: IpAddr = "169.254.0.7".parse().unwrap();
    for _ in 0..4 {
        mgr.notify_rx_packet(id(1), loopback);
        mgr.notify_rx_packet(id(1), link_local);
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    assert_eq!(recv(&mut rx).await, ConnEvent::Offline);
    assert_eq!(recv(&mut rx).await, ConnEvent::Online(id(1)));
}

#[tokio::test]
async fn test_run_online_check_direct() {
    let probe = StubProbe::new(200);
    let (mgr, _registry) = setup(&config(), probe.clone());

    mgr.run_online_check().await.unwrap();
    assert_eq!(probe.http_calls.load(Ordering::SeqCst), 1);

    probe.http_status.store(500, Ordering::SeqCst);
    assert!(matches!(
        mgr.run_online_check().await,
        Err(ConnMgrError::ProbeFailed(_))
    ));
}

#[tokio::test]
async fn test_moved_permanently_counts_as_online() {
    let probe = StubProbe::new(301);
    let (mgr, _registry) = setup(&config(), probe);
    mgr.run_online_check().await.unwrap();
}

#[tokio::test]
async fn test_ping_strategy_resolves_once() {
    let probe = StubProbe::new(200);
    let mut config = config();
    config.online_check.strategy = CheckStrategy::Ping;
    config.online_check.target = "example.net".to_string();
    let (mgr, _registry) = setup(&config, probe.clone());

    mgr.run_online_check().await.unwrap();
    mgr.run_online_check().await.unwrap();

    assert_eq!(probe.echo_calls.load(Ordering::SeqCst), 2);
    // DNS result is cached across checks.
    assert_eq!(probe.resolve_calls.load(Ordering::SeqCst), 1);

    // Changing the target drops the cache.
    mgr.set_online_check_target("example.org").unwrap();
    mgr.run_online_check().await.unwrap();
    assert_eq!(probe.resolve_calls.load(Ordering::SeqCst), 2);
}
