//! Property-based tests for CAM learning and forwarding.
//!
//! Each case spins up a current-thread runtime, attaches two peers
//! over duplex streams, and checks the learning/forwarding invariants
//! for arbitrary MAC addresses and payload sizes: a frame's source is
//! learned to the connection it arrived on, and a unicast to a learned
//! MAC reaches exactly that peer with the byte counters advancing by
//! exactly the frame length.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use vmtap_core::{Switch, VirtualDevice};
use vmtap_proto::{EtherType, MacAddr, ETHERNET_HEADER_LEN};

const GATEWAY_MAC: MacAddr = MacAddr([0x5a, 0x94, 0xef, 0xe4, 0x0c, 0xdd]);

struct NullDevice;

#[async_trait]
impl VirtualDevice for NullDevice {
    fn link_address(&self) -> MacAddr {
        GATEWAY_MAC
    }

    fn ip(&self) -> String {
        "192.168.127.1".to_string()
    }

    async fn deliver_network_packet(&self, _ethertype: EtherType, _payload: &[u8]) {}
}

/// Sink that remembers every frame a guest side receives.
#[derive(Clone, Default)]
struct Inbox(Arc<Mutex<Vec<Vec<u8>>>>);

impl Inbox {
    fn frames(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().clone()
    }
}

fn eth_frame(dst: MacAddr, src: MacAddr, payload_len: usize) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ETHERNET_HEADER_LEN + payload_len);
    frame.extend_from_slice(&dst.octets());
    frame.extend_from_slice(&src.octets());
    frame.extend_from_slice(&EtherType::IPV4.0.to_be_bytes());
    frame.extend((0..payload_len).map(|i| i as u8));
    frame
}

fn distinct_unicast_macs() -> impl Strategy<Value = (MacAddr, MacAddr)> {
    (any::<[u8; 6]>(), any::<[u8; 6]>())
        .prop_filter("distinct, non-broadcast, non-gateway", |(a, b)| {
            let a = MacAddr(*a);
            let b = MacAddr(*b);
            a != b && !a.is_broadcast() && !b.is_broadcast() && a != GATEWAY_MAC && b != GATEWAY_MAC
        })
        .prop_map(|(a, b)| (MacAddr(a), MacAddr(b)))
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });
    polled.await.unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Attach a hyperkit peer and pump everything it receives into an
/// [`Inbox`].
fn attach_peer(
    switch: &Arc<Switch>,
    token: &CancellationToken,
) -> (tokio::io::WriteHalf<tokio::io::DuplexStream>, Inbox) {
    let (host, guest) = tokio::io::duplex(1 << 20);
    {
        let switch = Arc::clone(switch);
        let token = token.child_token();
        tokio::spawn(async move { switch.accept_hyperkit(token, host).await });
    }
    let (mut read, write) = tokio::io::split(guest);
    let inbox = Inbox::default();
    {
        let inbox = inbox.clone();
        tokio::spawn(async move {
            loop {
                let mut header = [0u8; 2];
                if read.read_exact(&mut header).await.is_err() {
                    return;
                }
                let mut frame = vec![0u8; u16::from_le_bytes(header) as usize];
                if read.read_exact(&mut frame).await.is_err() {
                    return;
                }
                inbox.0.lock().unwrap().push(frame);
            }
        });
    }
    (write, inbox)
}

async fn send_hyperkit<W: AsyncWriteExt + Unpin>(write: &mut W, frame: &[u8]) {
    write.write_all(&(frame.len() as u16).to_le_bytes()).await.unwrap();
    write.write_all(frame).await.unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn learned_destinations_forward_exactly_once(
        (mac_x, mac_y) in distinct_unicast_macs(),
        payload_len in 0usize..512,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let switch = Arc::new(Switch::new(false, 1500));
            switch.connect(Arc::new(NullDevice));
            let token = CancellationToken::new();

            // X attaches alone first so it deterministically holds
            // connection id 0; its gateway-addressed announce teaches
            // the CAM without any peer seeing a frame.
            let (mut x_write, x_inbox) = attach_peer(&switch, &token);
            let announce = eth_frame(GATEWAY_MAC, mac_x, 46);
            let announced = announce.len() as u64;
            send_hyperkit(&mut x_write, &announce).await;
            wait_until("X learned", || {
                switch.bytes_received() >= announced
                    && switch.cam().contains_key(&mac_x.to_string())
            })
            .await;

            let (mut y_write, y_inbox) = attach_peer(&switch, &token);

            // Y unicasts to X: delivered to X alone, learned for Y,
            // and accounted byte-for-byte.
            let sent_before = switch.bytes_sent();
            let received_before = switch.bytes_received();
            let frame = eth_frame(mac_x, mac_y, payload_len);
            send_hyperkit(&mut y_write, &frame).await;

            wait_until("frame forwarded", || !x_inbox.frames().is_empty()).await;
            assert_eq!(x_inbox.frames(), vec![frame.clone()]);
            assert!(y_inbox.frames().is_empty());

            let cam = switch.cam();
            assert_eq!(cam.get(&mac_x.to_string()), Some(&0));
            assert_eq!(cam.get(&mac_y.to_string()), Some(&1));

            wait_until("counters settled", || {
                switch.bytes_sent() == sent_before + frame.len() as u64
                    && switch.bytes_received() == received_before + frame.len() as u64
            })
            .await;

            token.cancel();
        });
    }
}
