// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Gratuitous ARP and unsolicited neighbor advertisements.
//!
//! Addresses get reused by pods with different hardware addresses, so neighbors may still cache
//! the previous owner.  After addressing the pod interface we announce every address once.

use afpacket::sync::RawPacketStream;
use etherparse::{EtherType, Ethernet2Header, Icmpv6Type, PacketBuilder};
use interface_manager::{LinkError, LinkOps};
use net::eth::mac::Mac;
use net::interface::InterfaceName;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

const ARP_HTYPE_ETHERNET: u16 = 1;
const ARP_OP_REQUEST: u16 = 1;
const ICMPV6_NEIGHBOR_ADVERTISEMENT: u8 = 136;
/// Override flag of a neighbor advertisement.
const NA_OVERRIDE: u8 = 0x20;
/// NDP option: target link-layer address.
const NDP_TARGET_LLADDR: u8 = 2;
const NDP_HOP_LIMIT: u8 = 255;

const BROADCAST: Mac = Mac([0xff; 6]);
const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
const ALL_NODES_MAC: Mac = Mac([0x33, 0x33, 0, 0, 0, 1]);

const CARRIER_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum AnnounceError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("{0} has no hardware address")]
    NoMac(InterfaceName),
    #[error("failed to open a packet socket on {link}: {source}")]
    Socket {
        link: InterfaceName,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build announcement: {0}")]
    Build(#[from] etherparse::err::packet::BuildWriteError),
}

/// Something frames can be written to.
pub trait Transmit {
    fn transmit(&mut self, frame: &[u8]) -> std::io::Result<()>;
}

/// Opens a [`Transmit`] bound to a link of the calling thread's network namespace.
pub trait OpenTransmit: Sync {
    type Tx: Transmit;
    fn open(&self, link: &InterfaceName) -> std::io::Result<Self::Tx>;
}

/// An `AF_PACKET` socket.
pub struct PacketSocket(RawPacketStream);

impl Transmit for PacketSocket {
    fn transmit(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.0.write_all(frame)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PacketSockets;

impl OpenTransmit for PacketSockets {
    type Tx = PacketSocket;

    fn open(&self, link: &InterfaceName) -> std::io::Result<PacketSocket> {
        let mut socket = RawPacketStream::new()?;
        socket.bind(link.as_ref())?;
        Ok(PacketSocket(socket))
    }
}

/// A gratuitous ARP request claiming `ip` for `mac`.
#[must_use]
pub fn gratuitous_arp(mac: Mac, ip: Ipv4Addr) -> Vec<u8> {
    let ethernet = Ethernet2Header {
        source: mac.0,
        destination: BROADCAST.0,
        ether_type: EtherType::ARP,
    };
    let mut frame = Vec::with_capacity(Ethernet2Header::LEN + 28);
    frame.extend_from_slice(&ethernet.to_bytes());
    frame.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
    frame.extend_from_slice(&EtherType::IPV4.0.to_be_bytes());
    frame.push(6);
    frame.push(4);
    frame.extend_from_slice(&ARP_OP_REQUEST.to_be_bytes());
    frame.extend_from_slice(&mac.0);
    frame.extend_from_slice(&ip.octets());
    frame.extend_from_slice(&[0; 6]);
    frame.extend_from_slice(&ip.octets());
    frame
}

/// An unsolicited neighbor advertisement for `ip` with the override flag set, to all nodes.
pub fn unsolicited_na(mac: Mac, ip: Ipv6Addr) -> Result<Vec<u8>, AnnounceError> {
    let mut payload = Vec::with_capacity(24);
    payload.extend_from_slice(&ip.octets());
    payload.push(NDP_TARGET_LLADDR);
    payload.push(1);
    payload.extend_from_slice(&mac.0);

    let builder = PacketBuilder::ethernet2(mac.0, ALL_NODES_MAC.0)
        .ipv6(ip.octets(), ALL_NODES.octets(), NDP_HOP_LIMIT)
        .icmpv6(Icmpv6Type::Unknown {
            type_u8: ICMPV6_NEIGHBOR_ADVERTISEMENT,
            code_u8: 0,
            bytes5to8: [NA_OVERRIDE, 0, 0, 0],
        });
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, &payload)?;
    Ok(frame)
}

/// Announce each of `ips` once.  Failures are logged and skipped; returns how many went out.
pub fn announce_ips<T: Transmit>(tx: &mut T, mac: Mac, ips: &[IpAddr]) -> usize {
    let mut sent = 0;
    for ip in ips {
        let frame = match ip {
            IpAddr::V4(ip) => Ok(gratuitous_arp(mac, *ip)),
            IpAddr::V6(ip) => unsolicited_na(mac, *ip),
        };
        match frame.map(|frame| tx.transmit(&frame)) {
            Ok(Ok(())) => sent += 1,
            Ok(Err(err)) => warn!("failed to announce {ip}: {err}"),
            Err(err) => warn!("failed to announce {ip}: {err}"),
        }
    }
    sent
}

/// Announces the addresses of a freshly configured interface.
pub struct Announcer<'a, O> {
    sockets: &'a O,
    carrier_wait: Duration,
}

impl<'a, O: OpenTransmit> Announcer<'a, O> {
    pub fn new(sockets: &'a O, carrier_wait: Duration) -> Self {
        Announcer {
            sockets,
            carrier_wait,
        }
    }

    /// Wait (briefly) for carrier on `link`, then announce `ips` from its hardware address.
    ///
    /// Must be called from a thread in the namespace holding `link`.
    #[instrument(level = "debug", skip(self, links))]
    pub fn announce<L: LinkOps>(
        &self,
        links: &L,
        link: &InterfaceName,
        ips: &[IpAddr],
    ) -> Result<usize, AnnounceError> {
        let deadline = Instant::now() + self.carrier_wait;
        let mut info = links.link_by_name(link)?;
        while !info.carrier && Instant::now() < deadline {
            std::thread::sleep(CARRIER_POLL);
            info = links.link_by_name(link)?;
        }
        if !info.carrier {
            debug!("{link} has no carrier after {:?}, announcing anyway", self.carrier_wait);
        }
        let mac = info.mac.ok_or_else(|| AnnounceError::NoMac(link.clone()))?;
        let mut tx = self
            .sockets
            .open(link)
            .map_err(|source| AnnounceError::Socket {
                link: link.clone(),
                source,
            })?;
        Ok(announce_ips(&mut tx, mac, ips))
    }
}
