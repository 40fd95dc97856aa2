//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
#[cfg(not(feature = "testing"))]
use std::{
    io::{IoSlice, IoSliceMut},
    os::fd::AsRawFd,
    sync::Arc,
};

use bytes::{Buf, Bytes};
use derive_new::new;
#[cfg(not(feature = "testing"))]
use nix::sys::socket::{self, ControlMessageOwned, SockaddrIn};
use ospf_utils::Sender;
use serde::Serialize;
use smallvec::SmallVec;
#[cfg(not(feature = "testing"))]
use socket2::{Domain, InterfaceIndexOrAddress, Protocol, Socket, Type};
#[cfg(not(feature = "testing"))]
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc::error::SendError;

#[cfg(not(feature = "testing"))]
use crate::debug::Debug;
use crate::error::IoError;
use crate::packet::error::{DecodeError, DecodeResult};
#[cfg(not(feature = "testing"))]
use crate::packet::{Packet, PacketHdr};
use crate::tasks::messages::NetRxPacketMsg;
#[cfg(not(feature = "testing"))]
use crate::tasks::messages::NetTxPacketMsg;

// OSPF IP protocol number.
pub const OSPF_IP_PROTO: i32 = 89;

// OSPFv2 multicast addresses.
pub const ALL_SPF_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 5);
pub const ALL_DR_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 6);

// Minimum IPv4 header length.
const IPV4_HDR_MIN_LENGTH: usize = 20;

#[derive(Clone, Debug, Eq, PartialEq, new, Serialize)]
pub struct SendDestination {
    pub ifindex: u32,
    pub addrs: SmallVec<[Ipv4Addr; 4]>,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum MulticastAddr {
    AllSpfRtrs,
    AllDrRtrs,
}

// Multicast group membership. The group is left when the guard is dropped.
#[derive(Debug)]
pub struct MulticastGuard {
    #[cfg(not(feature = "testing"))]
    socket: Arc<AsyncFd<Socket>>,
    addr: MulticastAddr,
    ifindex: u32,
}

// ===== impl MulticastAddr =====

impl MulticastAddr {
    pub fn addr(&self) -> Ipv4Addr {
        match self {
            MulticastAddr::AllSpfRtrs => ALL_SPF_RTRS,
            MulticastAddr::AllDrRtrs => ALL_DR_RTRS,
        }
    }
}

// ===== impl MulticastGuard =====

impl MulticastGuard {
    #[cfg(not(feature = "testing"))]
    pub(crate) fn join(
        socket: &Arc<AsyncFd<Socket>>,
        addr: MulticastAddr,
        ifindex: u32,
    ) -> Result<MulticastGuard, IoError> {
        socket
            .get_ref()
            .join_multicast_v4_n(
                &addr.addr(),
                &InterfaceIndexOrAddress::Index(ifindex),
            )
            .map_err(|error| IoError::MulticastJoinError(addr, error))?;

        Ok(MulticastGuard {
            socket: socket.clone(),
            addr,
            ifindex,
        })
    }

    #[cfg(feature = "testing")]
    pub(crate) fn join(
        addr: MulticastAddr,
        ifindex: u32,
    ) -> Result<MulticastGuard, IoError> {
        Ok(MulticastGuard { addr, ifindex })
    }
}

impl Drop for MulticastGuard {
    fn drop(&mut self) {
        #[cfg(not(feature = "testing"))]
        if let Err(error) = self.socket.get_ref().leave_multicast_v4_n(
            &self.addr.addr(),
            &InterfaceIndexOrAddress::Index(self.ifindex),
        ) {
            IoError::MulticastLeaveError(self.addr, error).log();
        }
    }
}

// ===== global functions =====

// Creates the raw OSPF socket of an interface.
#[cfg(not(feature = "testing"))]
pub(crate) fn socket(ifname: &str) -> Result<Socket, std::io::Error> {
    use nix::sys::socket::sockopt;

    let socket = Socket::new(
        Domain::IPV4,
        Type::RAW,
        Some(Protocol::from(OSPF_IP_PROTO)),
    )?;

    socket.set_nonblocking(true)?;
    socket.bind_device(Some(ifname.as_bytes()))?;
    socket.set_multicast_loop_v4(false)?;
    socket.set_multicast_ttl_v4(1)?;
    socket::setsockopt(&socket, sockopt::Ipv4PacketInfo, &true)?;
    socket.set_tos_v4(libc::IPTOS_PREC_INTERNETCONTROL as u32)?;

    Ok(socket)
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn send_packet(
    socket: &AsyncFd<Socket>,
    src: Ipv4Addr,
    dst_ifindex: u32,
    dst_addr: Ipv4Addr,
    packet: &Packet,
) -> Result<usize, IoError> {
    Debug::PacketTx(dst_ifindex, &dst_addr, packet).log();

    // Encode packet.
    let buf = packet.encode();

    // Send packet.
    let iov = [IoSlice::new(&buf)];
    let sockaddr: SockaddrIn = std::net::SocketAddrV4::new(dst_addr, 0).into();
    let pktinfo = libc::in_pktinfo {
        ipi_ifindex: dst_ifindex as i32,
        ipi_spec_dst: libc::in_addr {
            s_addr: u32::from(src).to_be(),
        },
        ipi_addr: libc::in_addr { s_addr: 0 },
    };
    let cmsg = [socket::ControlMessage::Ipv4PacketInfo(&pktinfo)];
    socket
        .async_io(tokio::io::Interest::WRITABLE, |socket| {
            socket::sendmsg(
                socket.as_raw_fd(),
                &iov,
                &cmsg,
                socket::MsgFlags::empty(),
                Some(&sockaddr),
            )
            .map_err(|errno| errno.into())
        })
        .await
        .map_err(IoError::SendError)
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn write_loop(
    socket: Arc<AsyncFd<Socket>>,
    mut net_tx_packetc: ospf_utils::Receiver<NetTxPacketMsg>,
) {
    while let Some(NetTxPacketMsg { packet, src, dst }) =
        net_tx_packetc.recv().await
    {
        for dst_addr in dst.addrs {
            if let Err(error) =
                send_packet(&socket, src, dst.ifindex, dst_addr, &packet)
                    .await
            {
                error.log();
            }
        }
    }
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn read_loop(
    socket: Arc<AsyncFd<Socket>>,
    net_packet_rxp: Sender<NetRxPacketMsg>,
) -> Result<(), SendError<NetRxPacketMsg>> {
    let mut buf = [0; 16384];
    let mut iov = [IoSliceMut::new(&mut buf)];
    let mut cmsgspace = nix::cmsg_space!(libc::in_pktinfo);

    loop {
        // Receive data packet.
        match socket
            .async_io(tokio::io::Interest::READABLE, |socket| {
                match socket::recvmsg::<SockaddrIn>(
                    socket.as_raw_fd(),
                    &mut iov,
                    Some(&mut cmsgspace),
                    socket::MsgFlags::empty(),
                ) {
                    Ok(msg) => {
                        // Retrieve source address, destination address and
                        // ingress interface.
                        let src =
                            msg.address.map(|addr| Ipv4Addr::from(addr.ip()));
                        let pktinfo = msg.cmsgs().ok().and_then(|mut cmsgs| {
                            cmsgs.find_map(|cmsg| {
                                if let ControlMessageOwned::Ipv4PacketInfo(
                                    pktinfo,
                                ) = cmsg
                                {
                                    let dst = Ipv4Addr::from(u32::from_be(
                                        pktinfo.ipi_addr.s_addr,
                                    ));
                                    Some((pktinfo.ipi_ifindex as u32, dst))
                                } else {
                                    None
                                }
                            })
                        });
                        Ok((src, pktinfo, msg.bytes))
                    }
                    Err(errno) => Err(errno.into()),
                }
            })
            .await
        {
            Ok((src, pktinfo, bytes)) => {
                let Some(src) = src else {
                    IoError::RecvMissingSourceAddr.log();
                    continue;
                };
                let Some((ifindex, dst)) = pktinfo else {
                    IoError::RecvMissingAncillaryData.log();
                    continue;
                };

                // Decode packet.
                let mut buf = Bytes::copy_from_slice(&iov[0][0..bytes]);
                let packet = validate_ip_hdr(&mut buf)
                    .and_then(|_| Packet::decode(&mut buf));
                let msg = NetRxPacketMsg {
                    ifindex,
                    src,
                    dst,
                    packet,
                };
                net_packet_rxp.send(msg).await?;
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {
                // Retry if the syscall was interrupted (EINTR).
                continue;
            }
            Err(error) => {
                IoError::RecvError(error).log();
            }
        }
    }
}

// Validates the IPv4 header of a packet read from the raw socket, leaving the
// buffer positioned at the start of the OSPF packet.
pub fn validate_ip_hdr(buf: &mut Bytes) -> DecodeResult<()> {
    let buf_len = buf.len();
    if buf_len < IPV4_HDR_MIN_LENGTH {
        return Err(DecodeError::InvalidIpHdrLength(buf_len as u16));
    }

    // Parse IHL (header length).
    let hdr_len = ((buf[0] & 0x0F) as usize) << 2;
    if hdr_len < IPV4_HDR_MIN_LENGTH || hdr_len > buf_len {
        return Err(DecodeError::InvalidIpHdrLength(hdr_len as u16));
    }

    // Parse and validate the IP header total length.
    let total_len = u16::from_be_bytes([buf[2], buf[3]]);
    if buf_len != total_len as usize {
        return Err(DecodeError::InvalidIpHdrLength(total_len));
    }

    // Move past the IP header.
    buf.advance(hdr_len);

    Ok(())
}
