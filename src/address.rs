use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::atomic::{AtomicU32, Ordering},
};

pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const DEFAULT_BASE_PORT: u16 = 50100;

/// Offset handed out to the next endpoint request, shared by every allocator
/// in the process.
static NEXT_OFFSET: AtomicU32 = AtomicU32::new(0);

/// Hands out local endpoints for daemon instances.
///
/// Ports are `base_port + offset` where the offset comes from a single
/// process-wide counter, so allocators built with the same base never collide,
/// even across independent managers. No probing of the OS is done: isolation
/// relies on uniqueness within this process only.
///
/// Ports never wrap: once `base_port + offset` would leave the port range the
/// allocator is exhausted and hands out nothing further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocator {
    host: IpAddr,
    base_port: u16,
}

impl PortAllocator {
    pub const fn new(host: IpAddr, base_port: u16) -> Self {
        Self { host, base_port }
    }

    /// The next unused endpoint, or `None` once the port range above
    /// `base_port` is used up.
    pub fn next_endpoint(&self) -> Option<SocketAddr> {
        let offset = NEXT_OFFSET.fetch_add(1, Ordering::Relaxed);
        let port = u16::try_from(offset)
            .ok()
            .and_then(|offset| self.base_port.checked_add(offset))
            .filter(|&port| port != 0)?;
        Some(SocketAddr::new(self.host, port))
    }

    pub const fn host(&self) -> IpAddr {
        self.host
    }

    pub const fn base_port(&self) -> u16 {
        self.base_port
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_BASE_PORT)
    }
}
