//! UDP listener
//!
//! Receives datagrams on one socket and hands every decoded command to a
//! sink. Undecodable datagrams are logged and dropped; nothing here is
//! fatal to the process.

use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use ens_core::NumericCommand;

use crate::decode::decode;

/// Largest datagram accepted
const MAX_DATAGRAM: usize = 4096;

pub struct OscListener {
    socket: UdpSocket,
}

impl OscListener {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive forever, feeding `sink` in arrival order
    pub async fn run<F>(self, mut sink: F)
    where
        F: FnMut(NumericCommand),
    {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    log::warn!("[OSC] receive failed: {e}");
                    continue;
                }
            };
            match decode(&buf[..len]) {
                Ok(commands) => {
                    for cmd in commands {
                        log::debug!("[OSC] {from}: {cmd}");
                        sink(cmd);
                    }
                }
                Err(e) => log::warn!("[OSC] dropped {len}-byte datagram from {from}: {e}"),
            }
        }
    }
}

/// Bind and run on a background task
///
/// A bind failure is logged and the task ends; the rest of the server keeps
/// running without datagram control.
pub fn spawn<F>(addr: SocketAddr, sink: F) -> JoinHandle<()>
where
    F: FnMut(NumericCommand) + Send + 'static,
{
    tokio::spawn(async move {
        match OscListener::bind(addr).await {
            Ok(listener) => {
                log::info!("[OSC] listening on udp://{addr}");
                listener.run(sink).await;
            }
            Err(e) => log::error!("[OSC] cannot bind udp://{addr}: {e}"),
        }
    })
}
