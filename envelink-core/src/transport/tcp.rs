//! TCP transport: non-blocking std sockets, frames are 4-byte LE length + bytes.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::{debug, info, warn};

use super::{Endpoint, SendStatus, Transport, TransportError};

const LEN_SIZE: usize = 4;
const READ_CHUNK: usize = 64 * 1024;

enum Mode {
    Listen(TcpListener),
    Dial(Dialer),
}

/// Outbound connect state. At most one attempt is in flight; addresses are tried in turn.
struct Dialer {
    addrs: Vec<SocketAddr>,
    next: usize,
    pending: Option<(Socket, SocketAddr)>,
}

impl Dialer {
    fn new(addrs: Vec<SocketAddr>) -> Self {
        Self {
            addrs,
            next: 0,
            pending: None,
        }
    }

    /// Start or advance a connect attempt without blocking. Returns the stream once the
    /// handshake has completed.
    fn poll(&mut self) -> Option<(TcpStream, SocketAddr)> {
        if self.pending.is_none() {
            let addr = self.addrs[self.next];
            self.next = (self.next + 1) % self.addrs.len();
            match start_connect(addr) {
                Ok(socket) => self.pending = Some((socket, addr)),
                Err(e) => {
                    debug!(%addr, error = %e, "connect failed");
                    return None;
                }
            }
        }
        let (socket, addr) = self.pending.as_ref()?;
        match connect_finished(socket) {
            Ok(true) => self
                .pending
                .take()
                .map(|(socket, addr)| (TcpStream::from(socket), addr)),
            Ok(false) => None,
            Err(e) => {
                debug!(%addr, error = %e, "connect failed");
                self.pending = None;
                None
            }
        }
    }
}

fn start_connect(addr: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(e) if connect_in_progress(&e) => {}
        Err(e) => return Err(e),
    }
    Ok(socket)
}

fn connect_in_progress(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::EINPROGRESS)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Ok(false) while the handshake is still running.
fn connect_finished(socket: &Socket) -> io::Result<bool> {
    if let Some(e) = socket.take_error()? {
        return Err(e);
    }
    match socket.peer_addr() {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
        Err(e) => Err(e),
    }
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    eof: bool,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        // Unsent bytes are discarded on close instead of holding the socket open.
        SockRef::from(&stream).set_linger(Some(Duration::ZERO))?;
        Ok(Self {
            stream,
            peer,
            inbound: Vec::new(),
            outbound: Vec::new(),
            eof: false,
        })
    }

    /// Write as much buffered output as the socket takes. Returns true once drained.
    fn flush(&mut self) -> io::Result<bool> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Read what is available, stopping once a whole frame (or an oversized header)
    /// is buffered. Unread bytes stay in the kernel and push back on the peer.
    fn fill(&mut self, max_frame_len: usize) -> io::Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        while !self.eof && !self.frame_ready(max_frame_len) {
            match self.stream.read(&mut buf) {
                Ok(0) => self.eof = true,
                Ok(n) => self.inbound.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn declared_len(&self) -> Option<usize> {
        let header = self.inbound.get(..LEN_SIZE)?;
        Some(u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize)
    }

    fn frame_ready(&self, max_frame_len: usize) -> bool {
        match self.declared_len() {
            Some(len) => len > max_frame_len || self.inbound.len() >= LEN_SIZE + len,
            None => false,
        }
    }

    /// Take one complete frame off the inbound buffer.
    fn next_frame(&mut self, max_frame_len: usize) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(len) = self.declared_len() else {
            return Ok(None);
        };
        if len > max_frame_len {
            return Err(TransportError::FrameTooLarge(len));
        }
        if self.inbound.len() < LEN_SIZE + len {
            return Ok(None);
        }
        let frame = self.inbound[LEN_SIZE..LEN_SIZE + len].to_vec();
        self.inbound.drain(..LEN_SIZE + len);
        Ok(Some(frame))
    }
}

/// One end of a `tcp://` connection. A server serves one peer at a time.
pub struct TcpTransport {
    mode: Mode,
    conn: Option<Connection>,
    max_frame_len: usize,
    closed: bool,
}

impl TcpTransport {
    /// Bind and listen. `*` binds every interface.
    pub fn bind(host: &str, port: u16, max_frame_len: usize) -> io::Result<Self> {
        let host = if host == "*" { "0.0.0.0" } else { host };
        let listener = TcpListener::bind((host, port))?;
        listener.set_nonblocking(true)?;
        info!(addr = %listener.local_addr()?, "listening");
        Ok(Self {
            mode: Mode::Listen(listener),
            conn: None,
            max_frame_len,
            closed: false,
        })
    }

    /// Resolve `host:port` now; the connection itself is made lazily by the poll step.
    pub fn connect(host: &str, port: u16, max_frame_len: usize) -> io::Result<Self> {
        let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "host resolved to no addresses",
            ));
        }
        Ok(Self {
            mode: Mode::Dial(Dialer::new(addrs)),
            conn: None,
            max_frame_len,
            closed: false,
        })
    }

    /// Address the listener is bound to (server side only).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.mode {
            Mode::Listen(l) => l.local_addr().ok(),
            Mode::Dial(_) => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Accept or dial if there is no live connection. Returns whether one exists now.
    fn ensure_connected(&mut self) -> Result<bool, TransportError> {
        if self.closed {
            return Err(TransportError::Disconnected);
        }
        if self.conn.is_some() {
            return Ok(true);
        }
        let established = match &mut self.mode {
            Mode::Listen(listener) => match listener.accept() {
                Ok((stream, peer)) => Some((stream, peer)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
                Err(e) => return Err(e.into()),
            },
            Mode::Dial(dialer) => dialer.poll(),
        };
        let Some((stream, peer)) = established else {
            return Ok(false);
        };
        let conn = Connection::new(stream, peer)?;
        info!(%peer, "connection established");
        self.conn = Some(conn);
        Ok(true)
    }

    fn drop_connection(&mut self, reason: &str) -> TransportError {
        if let Some(conn) = self.conn.take() {
            warn!(peer = %conn.peer, reason, "connection lost");
        }
        TransportError::Disconnected
    }

    fn io_failure(&mut self, e: io::Error) -> TransportError {
        match e.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::WriteZero => self.drop_connection("peer reset"),
            _ => TransportError::Io(e),
        }
    }
}

impl Transport for TcpTransport {
    fn try_send(&mut self, frame: &[u8]) -> Result<SendStatus, TransportError> {
        if frame.len() > self.max_frame_len {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        if !self.ensure_connected()? {
            return Ok(SendStatus::NotReady);
        }
        let Some(conn) = self.conn.as_mut() else {
            return Ok(SendStatus::NotReady);
        };
        let drained = match conn.flush() {
            Ok(d) => d,
            Err(e) => return Err(self.io_failure(e)),
        };
        if !drained {
            return Ok(SendStatus::NotReady);
        }
        conn.outbound.reserve(LEN_SIZE + frame.len());
        conn.outbound
            .extend_from_slice(&(frame.len() as u32).to_le_bytes());
        conn.outbound.extend_from_slice(frame);
        if let Err(e) = conn.flush() {
            return Err(self.io_failure(e));
        }
        Ok(SendStatus::Sent)
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.ensure_connected()? {
            return Ok(None);
        }
        let max_frame_len = self.max_frame_len;
        let Some(conn) = self.conn.as_mut() else {
            return Ok(None);
        };
        // Keep draining frames accepted earlier while this side waits for a reply.
        let io_result = conn.flush().and_then(|_| conn.fill(max_frame_len));
        if let Err(e) = io_result {
            return Err(self.io_failure(e));
        }
        match conn.next_frame(max_frame_len) {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) if conn.eof => Err(self.drop_connection("peer closed")),
            Ok(None) => Ok(None),
            Err(e) => {
                self.drop_connection("oversized frame");
                Err(e)
            }
        }
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        self.local_addr().map(|addr| Endpoint::Tcp {
            host: addr.ip().to_string(),
            port: addr.port(),
        })
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !conn.outbound.is_empty() {
                debug!(peer = %conn.peer, bytes = conn.outbound.len(), "discarding unsent bytes");
            }
        }
        if let Mode::Dial(dialer) = &mut self.mode {
            dialer.pending = None;
        }
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    const MAX: usize = 1024 * 1024;

    fn pair() -> (TcpTransport, TcpTransport) {
        let server = TcpTransport::bind("127.0.0.1", 0, MAX).unwrap();
        let port = server.local_addr().unwrap().port();
        let client = TcpTransport::connect("127.0.0.1", port, MAX).unwrap();
        (server, client)
    }

    fn send_within(t: &mut TcpTransport, frame: &[u8], limit: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if t.try_send(frame).unwrap() == SendStatus::Sent {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn recv_within(t: &mut TcpTransport, limit: Duration) -> Option<Vec<u8>> {
        let start = Instant::now();
        while start.elapsed() < limit {
            if let Some(f) = t.try_recv().unwrap() {
                return Some(f);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn frames_cross_loopback_in_order() {
        let (mut server, mut client) = pair();
        assert_eq!(server.try_recv().unwrap(), None);
        assert!(send_within(&mut client, b"one", Duration::from_secs(5)));
        assert_eq!(recv_within(&mut server, Duration::from_secs(5)), Some(b"one".to_vec()));
        assert_eq!(client.try_send(b"two").unwrap(), SendStatus::Sent);
        assert_eq!(recv_within(&mut server, Duration::from_secs(5)), Some(b"two".to_vec()));
        assert_eq!(server.try_send(b"reply").unwrap(), SendStatus::Sent);
        assert_eq!(recv_within(&mut client, Duration::from_secs(5)), Some(b"reply".to_vec()));
    }

    #[test]
    fn client_without_server_is_not_ready() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let mut client = TcpTransport::connect("127.0.0.1", port, MAX).unwrap();
        assert_eq!(client.try_send(b"x").unwrap(), SendStatus::NotReady);
        assert_eq!(client.try_recv().unwrap(), None);
        assert!(!client.is_connected());
    }

    /// Listener with a full accept backlog: the handshake never completes.
    fn saturated_listener() -> (Socket, Vec<Socket>) {
        let listener = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        listener.bind(&addr.into()).unwrap();
        listener.listen(0).unwrap();
        let addr = listener.local_addr().unwrap().as_socket().unwrap();
        let fillers = (0..8).map(|_| start_connect(addr).unwrap()).collect();
        (listener, fillers)
    }

    #[test]
    fn connect_to_stalled_listener_never_blocks() {
        let (listener, _fillers) = saturated_listener();
        let port = listener.local_addr().unwrap().as_socket().unwrap().port();
        let mut client = TcpTransport::connect("127.0.0.1", port, MAX).unwrap();
        for _ in 0..5 {
            let start = Instant::now();
            let status = client.try_send(b"x").unwrap();
            assert!(start.elapsed() < Duration::from_millis(20), "try_send blocked");
            if status == SendStatus::Sent {
                break;
            }
            let start = Instant::now();
            client.try_recv().unwrap();
            assert!(start.elapsed() < Duration::from_millis(20), "try_recv blocked");
        }
    }

    #[test]
    fn fill_stops_after_one_frame() {
        const FRAME: usize = 200 * 1024;
        const FRAMES: usize = 10;
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let writer = std::thread::spawn(move || {
            let mut out = TcpStream::connect(addr).unwrap();
            for i in 0..FRAMES {
                out.write_all(&(FRAME as u32).to_le_bytes()).unwrap();
                out.write_all(&vec![i as u8; FRAME]).unwrap();
            }
        });
        let (stream, peer) = listener.accept().unwrap();
        let mut conn = Connection::new(stream, peer).unwrap();
        let start = Instant::now();
        let mut got = 0;
        while got < FRAMES {
            assert!(start.elapsed() < Duration::from_secs(10), "timed out");
            conn.fill(MAX).unwrap();
            assert!(conn.inbound.len() <= LEN_SIZE + FRAME + READ_CHUNK);
            match conn.next_frame(MAX).unwrap() {
                Some(frame) => {
                    assert_eq!(frame, vec![got as u8; FRAME]);
                    got += 1;
                }
                None => std::thread::sleep(Duration::from_millis(1)),
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn oversized_frame_rejected_before_send() {
        let (_server, mut client) = pair();
        let big = vec![0u8; MAX + 1];
        assert!(matches!(
            client.try_send(&big),
            Err(TransportError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn frame_split_across_reads_is_reassembled() {
        let mut c = Connection {
            stream: {
                let l = TcpListener::bind("127.0.0.1:0").unwrap();
                TcpStream::connect(l.local_addr().unwrap()).unwrap()
            },
            peer: "127.0.0.1:1".parse().unwrap(),
            inbound: Vec::new(),
            outbound: Vec::new(),
            eof: false,
        };
        c.inbound.extend_from_slice(&3u32.to_le_bytes());
        c.inbound.extend_from_slice(b"ab");
        assert_eq!(c.next_frame(MAX).unwrap(), None);
        c.inbound.extend_from_slice(b"c");
        c.inbound.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(c.next_frame(MAX).unwrap(), Some(b"abc".to_vec()));
        assert_eq!(c.next_frame(MAX).unwrap(), Some(Vec::new()));
        assert_eq!(c.next_frame(MAX).unwrap(), None);
    }

    #[test]
    fn peer_close_reports_disconnected_then_reaccepts() {
        let (mut server, mut client) = pair();
        assert!(send_within(&mut client, b"hi", Duration::from_secs(5)));
        assert_eq!(recv_within(&mut server, Duration::from_secs(5)), Some(b"hi".to_vec()));
        client.close();
        let start = Instant::now();
        let mut saw_disconnect = false;
        while start.elapsed() < Duration::from_secs(5) {
            match server.try_recv() {
                Err(TransportError::Disconnected) => {
                    saw_disconnect = true;
                    break;
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(1)),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(saw_disconnect);
        assert!(!server.is_connected());
        assert_eq!(server.try_recv().unwrap(), None);
    }

    #[test]
    fn closed_transport_reports_disconnected() {
        let (mut server, _client) = pair();
        server.close();
        assert!(matches!(server.try_recv(), Err(TransportError::Disconnected)));
    }
}
