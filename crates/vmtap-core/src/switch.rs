//! L2 learning switch bridging hypervisor connections and the gateway.
//!
//! The switch owns every attached [`HypervisorConn`], learns source
//! MACs into its CAM as frames arrive, copies frames between peers,
//! and hands gateway-addressed (or broadcast) traffic up to the
//! attached [`VirtualDevice`] with the Ethernet header stripped.
//!
//! # Locking
//!
//! Three locks, acquired in this order when held together:
//!
//! 1. `write_lock`: serializes all outbound writes so frame bytes
//!    can never interleave on a stream connection.
//! 2. `conns`: connection table and id allocator.
//! 3. `cam`: the MAC forwarding table; read on the hot tx path,
//!    written on learn and detach. A `std` lock, never held across an
//!    await.
//!
//! No lock is held while calling out to the gateway endpoint.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use vmtap_proto::{
    describe_frame, EtherType, EthernetHeader, FrameError, MacAddr, ETHERNET_HEADER_LEN,
};

use crate::conn::{FrameSink, FrameSource, HypervisorConn};
use crate::counters::TrafficCounters;
use crate::device::VirtualDevice;
use crate::error::SwitchError;

/// Default MTU advertised to collaborators. The switch stores the MTU
/// for inspection only; it never fragments.
pub const DEFAULT_MTU: usize = 1500;

/// One attached connection's transmit side.
struct Port {
    sink: FrameSink,
    token: CancellationToken,
}

/// Connection table and id allocator, guarded by one lock. Ids are
/// monotonically increasing and never reused within a process run; a
/// `BTreeMap` keeps broadcast iteration order deterministic.
#[derive(Default)]
struct ConnTable {
    next_id: usize,
    ports: BTreeMap<usize, Port>,
}

/// The learning switch.
///
/// Constructed once per virtual network. The gateway endpoint is
/// attached with [`connect`](Self::connect) before the first
/// [`accept`](Self::accept); each hypervisor connection then runs its
/// own accept task until cancellation or failure.
pub struct Switch {
    debug: bool,
    mtu: usize,
    counters: TrafficCounters,
    conns: Mutex<ConnTable>,
    cam: RwLock<HashMap<MacAddr, usize>>,
    write_lock: Mutex<()>,
    gateway: OnceLock<Arc<dyn VirtualDevice>>,
}

impl Switch {
    /// Create a switch. `debug` enables per-packet summaries in the
    /// logs; `mtu` is recorded for collaborators to advertise.
    #[must_use]
    pub fn new(debug: bool, mtu: usize) -> Self {
        Self {
            debug,
            mtu,
            counters: TrafficCounters::default(),
            conns: Mutex::new(ConnTable::default()),
            cam: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            gateway: OnceLock::new(),
        }
    }

    /// Attach the gateway endpoint. Expected exactly once, before any
    /// `accept`; later calls keep the original endpoint.
    pub fn connect(&self, device: Arc<dyn VirtualDevice>) {
        if self.gateway.set(device).is_err() {
            tracing::warn!("gateway endpoint already connected, keeping the original");
        }
    }

    /// The MTU this switch was constructed with.
    #[must_use]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Total bytes successfully handed to peer write paths.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.counters.sent()
    }

    /// Total bytes successfully read from peers.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.counters.received()
    }

    /// Snapshot of the forwarding table, keyed by MAC display string.
    #[must_use]
    pub fn cam(&self) -> HashMap<String, usize> {
        self.read_cam().iter().map(|(mac, id)| (mac.to_string(), *id)).collect()
    }

    /// Inbound from the gateway endpoint: route one full Ethernet
    /// frame to its destination peer(s).
    ///
    /// Transmit failures are logged and swallowed here; the gateway's
    /// tasks must not die because one peer did.
    pub async fn deliver_network_packet(&self, _ethertype: EtherType, frame: &[u8]) {
        if let Err(err) = self.tx(frame).await {
            tracing::error!(%err, "failed to forward frame from the gateway");
        }
    }

    /// Attach `conn` and pump its receive loop until `token` is
    /// cancelled or the connection fails, then detach it.
    ///
    /// Returns the terminating error, if any. Cancellation is observed
    /// at the next frame boundary and returns `Ok`.
    pub async fn accept(
        &self,
        token: CancellationToken,
        conn: HypervisorConn,
    ) -> Result<(), SwitchError> {
        if self.gateway.get().is_none() {
            return Err(SwitchError::GatewayNotConnected);
        }

        let (protocol, mut source, sink) = conn.split();
        // A child token lets a failing write detach this connection
        // (and stop its receive loop) without cancelling the caller's
        // token, while caller cancellation still propagates down.
        let token = token.child_token();
        let id = self.attach(sink, token.clone()).await;
        tracing::debug!(id, %protocol, "attached hypervisor connection");

        let result = self.rx_loop(&token, id, &mut source).await;
        self.detach(id).await;
        if let Err(err) = &result {
            tracing::error!(id, %err, "cannot receive packets, disconnecting");
        }
        result
    }

    async fn rx_loop(
        &self,
        token: &CancellationToken,
        id: usize,
        source: &mut FrameSource,
    ) -> Result<(), SwitchError> {
        loop {
            let len = tokio::select! {
                () = token.cancelled() => return Ok(()),
                filled = source.fill() => filled?,
            };
            // Processing happens outside the select so that a write in
            // flight to a peer is never torn down mid-frame by
            // cancellation of this reader.
            self.process_frame(id, source.filled(len)).await;
        }
    }

    /// Handle one frame received from connection `id`: learn its
    /// source, bridge it to peers, and deliver gateway-addressed or
    /// broadcast traffic up the stack.
    async fn process_frame(&self, id: usize, frame: &[u8]) {
        let Some(eth) = EthernetHeader::parse(frame) else {
            tracing::warn!(id, len = frame.len(), "dropping runt frame");
            return;
        };
        if self.debug {
            tracing::debug!(id, "{}", describe_frame(frame));
        }

        let dst = eth.destination();
        self.write_cam().insert(eth.source(), id);

        // Set before any accept; see the guard in `accept`.
        let Some(gateway) = self.gateway.get() else { return };
        let gateway_mac = gateway.link_address();

        if dst != gateway_mac {
            if let Err(err) = self.tx(frame).await {
                tracing::error!(%err, "failed to forward frame");
            }
        }
        if dst == gateway_mac || dst == MacAddr::BROADCAST {
            gateway
                .deliver_network_packet(eth.ethertype(), &frame[ETHERNET_HEADER_LEN..])
                .await;
        }

        self.counters.add_received(frame.len() as u64);
    }

    /// Forward one full Ethernet frame to its destination port(s).
    ///
    /// Unknown unicast destinations are dropped silently (the bridge
    /// has not observed the target yet). A broadcast copies the frame
    /// to every port except the one the source MAC maps to; a peer
    /// whose write fails is detached and the error propagates without
    /// attempting the remaining peers.
    async fn tx(&self, frame: &[u8]) -> Result<(), SwitchError> {
        let eth =
            EthernetHeader::parse(frame).ok_or(SwitchError::RuntFrame { len: frame.len() })?;
        let src = eth.source();
        let dst = eth.destination();

        let _write = self.write_lock.lock().await;
        let mut table = self.conns.lock().await;

        if dst == MacAddr::BROADCAST {
            let src_id = self.read_cam().get(&src).copied();
            let ids: Vec<usize> = table.ports.keys().copied().collect();
            for id in ids {
                if Some(id) == src_id {
                    continue;
                }
                if self.tx_port(&mut table, id, frame).await? {
                    self.counters.add_sent(frame.len() as u64);
                }
            }
        } else {
            let Some(id) = self.read_cam().get(&dst).copied() else {
                return Ok(());
            };
            if self.tx_port(&mut table, id, frame).await? {
                self.counters.add_sent(frame.len() as u64);
            }
        }
        Ok(())
    }

    /// Write one frame to one port, retrying while the transport
    /// reports exhausted buffer space. Returns whether the frame was
    /// actually written; a port that raced detach swallows the frame
    /// without error.
    ///
    /// Datagram sockets to paravirtual NICs refuse with `ENOBUFS`
    /// while the guest receive queue is full; dropping the frame would
    /// desynchronize guest TCP, so the same write is retried until it
    /// succeeds, fails differently, or the port is cancelled.
    async fn tx_port(
        &self,
        table: &mut ConnTable,
        id: usize,
        frame: &[u8],
    ) -> Result<bool, SwitchError> {
        let result = loop {
            let Some(port) = table.ports.get_mut(&id) else {
                // The port detached while its CAM entry lingered; drop
                // the stale mapping and the frame with it.
                self.write_cam().retain(|_, port_id| *port_id != id);
                return Ok(false);
            };
            if port.token.is_cancelled() {
                break Err(SwitchError::PortClosed { id });
            }
            match port.sink.write_frame(frame).await {
                Ok(()) => break Ok(true),
                Err(err) if is_enobufs(&err) => tokio::task::yield_now().await,
                Err(err) => break Err(err.into()),
            }
        };
        if result.is_err() {
            self.detach_locked(table, id);
        }
        result
    }

    /// Insert a new port under a fresh id.
    async fn attach(&self, sink: FrameSink, token: CancellationToken) -> usize {
        let mut table = self.conns.lock().await;
        let id = table.next_id;
        table.next_id += 1;
        table.ports.insert(id, Port { sink, token });
        id
    }

    async fn detach(&self, id: usize) {
        let mut table = self.conns.lock().await;
        self.detach_locked(&mut table, id);
    }

    /// Purge `id` from the CAM, cancel its token, and drop its
    /// transmit half (which closes the channel). Safe to call twice:
    /// a port can be detached by a failing write and again by its own
    /// accept epilogue.
    fn detach_locked(&self, table: &mut ConnTable, id: usize) {
        self.write_cam().retain(|_, port_id| *port_id != id);
        if let Some(port) = table.ports.remove(&id) {
            port.token.cancel();
            tracing::debug!(id, "detached hypervisor connection");
        }
    }

    fn read_cam(&self) -> RwLockReadGuard<'_, HashMap<MacAddr, usize>> {
        self.cam.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_cam(&self) -> RwLockWriteGuard<'_, HashMap<MacAddr, usize>> {
        self.cam.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_enobufs(err: &FrameError) -> bool {
    matches!(err, FrameError::Io(io) if io.raw_os_error() == Some(libc::ENOBUFS))
}
