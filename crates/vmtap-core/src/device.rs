//! Gateway endpoint contract.

use async_trait::async_trait;

use vmtap_proto::{EtherType, MacAddr};

/// The in-process IP stack that terminates gateway-addressed traffic
/// and originates replies.
///
/// The switch owns its endpoint as a trait object, attached once via
/// [`Switch::connect`](crate::Switch::connect). For the reverse path
/// the endpoint keeps a non-owning handle back to the switch and calls
/// [`Switch::deliver_network_packet`](crate::Switch::deliver_network_packet),
/// so there is no owned reference cycle between the two.
///
/// `deliver_network_packet` must absorb its own failures: the switch
/// calls it with no locks held and does not expect an error back.
#[async_trait]
pub trait VirtualDevice: Send + Sync {
    /// Link-layer address of the gateway. Frames addressed here (or
    /// broadcast) are handed to the endpoint instead of being bridged.
    fn link_address(&self) -> MacAddr;

    /// Gateway IP address in dotted form, for observability.
    fn ip(&self) -> String;

    /// Deliver one inbound packet. `payload` is the frame with its
    /// 14-byte Ethernet header already stripped; `ethertype` is the
    /// header's EtherType field.
    async fn deliver_network_packet(&self, ethertype: EtherType, payload: &[u8]);
}
