//! Scenario constants. These are set to match the ns-3 LENA/EPC default behavior.

use std::net::Ipv4Addr;

use crate::units::{BitsPerSec, Bytes, Nanosecs};

/// Downlink port counter seed.
pub const DL_PORT_BASE: u16 = 1234;

/// Uplink port counter seed.
pub const UL_PORT_BASE: u16 = 2000;

/// Peer port counter seed.
pub const PEER_PORT_BASE: u16 = 3000;

/// The network terminals are addressed from.
pub const UE_NETWORK: Ipv4Addr = Ipv4Addr::new(7, 0, 0, 0);

/// The mask of [`UE_NETWORK`].
pub const UE_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 0, 0, 0);

/// First ephemeral port handed out to client sockets.
pub const EPHEMERAL_PORT_BASE: u16 = 49153;

/// IPv4 + UDP header overhead counted by the flow monitor.
pub const SZ_UDP_IP_HDR: Bytes = Bytes::new(28);

/// IPv4 + TCP header overhead counted by the flow monitor.
pub const SZ_TCP_IP_HDR: Bytes = Bytes::new(40);

/// Core link defaults.
pub const CORE_DATA_RATE: BitsPerSec = BitsPerSec::from_gbps(100);
pub const CORE_MTU: u16 = 1500;
pub const CORE_DELAY: Nanosecs = Nanosecs::from_millis(10);
