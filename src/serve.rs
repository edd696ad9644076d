use std::net::UdpSocket;
use std::sync::Arc;

use chrono::Utc;
use libjetex::codec::{self, MAX_LOOKUP_SIZE};
use libjetex::Namespace;

use crate::error::Result;

fn now_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Runs the serve loop contract (spec.md §4.5, §6.3): binds one thread per
/// listen address, decodes lookup datagrams against `namespace`, and replies
/// with found/missing until `deadline` (seconds since the epoch) passes.
pub fn serve(namespace: Arc<Namespace>, sockets: Vec<UdpSocket>, deadline: f64) -> Result<()> {
    let mut handles = Vec::with_capacity(sockets.len());

    for socket in sockets {
        let namespace = Arc::clone(&namespace);
        handles.push(std::thread::spawn(move || serve_one(namespace, socket, deadline)));
    }

    for handle in handles {
        // A panic in a serving thread is a bug; propagate it rather than
        // silently losing a listener.
        handle.join().expect("serve thread panicked");
    }

    Ok(())
}

fn serve_one(namespace: Arc<Namespace>, socket: UdpSocket, deadline: f64) {
    let mut recv_buf = [0u8; MAX_LOOKUP_SIZE];
    let mut send_buf = [0u8; 1 << 15];

    socket
        .set_read_timeout(Some(std::time::Duration::from_millis(200)))
        .expect("setting a socket read timeout should never fail");

    loop {
        if deadline.is_finite() && Utc::now().timestamp() as f64 >= deadline {
            return;
        }

        let (len, source) = match socket.recv_from(&mut recv_buf) {
            Ok(pair) => pair,
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(err) => {
                log::warn!("recv_from failed: {err}");
                continue;
            }
        };

        let decoded = match codec::lookup_decode(&recv_buf[..len], source) {
            Ok(decoded) => decoded,
            Err(err) => {
                log::debug!("dropping malformed datagram from {source}: {err:?}");
                continue;
            }
        };

        let mut header = decoded.header;
        if !header.dec_ttl() {
            log::debug!("dropping TTL-expired datagram from {source}");
            continue;
        }
        if header.expired(now_ms()) {
            log::debug!("dropping deadline-expired datagram from {source}");
            continue;
        }

        let Some(table) = namespace.table(decoded.table) else {
            log::debug!("dropping datagram for unknown table {}", decoded.table);
            continue;
        };

        let key_bytes = key_words_to_bytes(&decoded.key, decoded.key_len);

        let encoded_len = match table.lookup(&decoded.key) {
            Some(value) => codec::found_encode(
                &mut send_buf,
                decoded.correlation,
                decoded.table,
                &key_bytes,
                value,
            ),
            None => codec::missing_encode(&mut send_buf, decoded.correlation, decoded.table, &key_bytes),
        };

        match encoded_len {
            Ok(n) => {
                if let Err(err) = socket.send_to(&send_buf[..n], decoded.destination) {
                    log::debug!("send_to {} failed: {err}", decoded.destination);
                }
            }
            Err(err) => log::warn!("failed to encode response: {err:?}"),
        }
    }
}

fn key_words_to_bytes(key: &[u64; 8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for word in &key[..len / 8] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out
}
