// Socket helpers shared by the relay server and the session client.
//
// Both sides run a blocking `recv` loop on a dedicated thread and stop it
// cooperatively: clear the running flag, then call `wake_receiver` so the
// pending `recv` returns immediately. On unix this is `shutdown(2)`, which
// wakes a blocked receive even on an unconnected UDP socket. Elsewhere the
// socket's read timeout bounds how long the loop takes to notice the flag.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{SystemTime, UNIX_EPOCH};

use laba_protocol::{Packet, encode};

use crate::error::SessionError;

/// Milliseconds since the Unix epoch, for the packet timestamp field.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Frame `packet` and send it to `target`.
pub fn send_packet(
    socket: &UdpSocket,
    packet: &Packet,
    checksums: bool,
    target: SocketAddr,
) -> Result<(), SessionError> {
    let frame = encode(packet, checksums)?;
    socket.send_to(&frame, target)?;
    Ok(())
}

/// Unblock any thread sitting in `recv` on this socket (or a clone of it).
#[cfg(unix)]
pub fn wake_receiver(socket: &UdpSocket) {
    use std::os::fd::AsRawFd;

    // SAFETY: the descriptor is owned by `socket` and stays open for the
    // duration of the call. shutdown(2) does not close it.
    let rc = unsafe { libc::shutdown(socket.as_raw_fd(), libc::SHUT_RDWR) };
    if rc != 0 {
        // Unconnected UDP sockets report ENOTCONN but are still woken.
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ENOTCONN) {
            tracing::debug!(error = %err, "socket shutdown failed");
        }
    }
}

#[cfg(not(unix))]
pub fn wake_receiver(_socket: &UdpSocket) {}

/// True for the errors a read timeout produces.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
