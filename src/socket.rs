//! Event-driven raw socket.
//!
//! A `RawSocket` owns one receive buffer reused for every inbound packet and a
//! FIFO of outbound requests. Readiness reported by the native socket drives
//! both directions: each send-ready event transmits at most one queued
//! request, each recv-ready event delivers at most one `message`.

use std::cmp;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::mem;
use std::net::IpAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use byteorder::{ByteOrder, NativeEndian};
use log::{debug, error, trace, warn};

use crate::checksum;
use crate::config::SocketConfig;
use crate::error::{Error, Result};
use crate::events::Listeners;
use crate::options::{SockOpt, SocketLevel, SocketOption};
use crate::platform::{self, Event, Native, SysSocket};

type SendCallback = Box<dyn FnOnce(Result<usize>)>;

struct SendRequest {
    buffer: Box<dyn AsRef<[u8]>>,
    offset: usize,
    length: usize,
    address: IpAddr,
    scope_id: u32,
    callback: SendCallback,
}

impl SendRequest {
    fn payload(&self) -> &[u8] {
        let buffer = (*self.buffer).as_ref();
        &buffer[self.offset..self.offset + self.length]
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Open,
    Closing,
    Closed,
}

pub struct RawSocket<N: Native = SysSocket> {
    config: SocketConfig,
    native: N,
    buffer: Box<[u8]>,
    requests: VecDeque<SendRequest>,
    recv_paused: bool,
    send_paused: bool,
    state: State,
    listeners: Listeners,
    events: Vec<Event>,
}

impl RawSocket<SysSocket> {
    /// Opens an OS raw socket. Failing to open is reported here, never as an
    /// `error` event.
    pub fn create(config: SocketConfig) -> Result<Self> {
        Self::open(config)
    }
}

impl<N: Native> RawSocket<N> {
    pub fn open(config: SocketConfig) -> Result<Self> {
        let native = N::open(config.protocol, config.address_family)?;
        Ok(RawSocket::from_native(config, native))
    }

    pub fn from_native(config: SocketConfig, native: N) -> Self {
        let mut socket = RawSocket {
            buffer: vec![0; config.buffer_size].into_boxed_slice(),
            config: config,
            native: native,
            requests: VecDeque::new(),
            recv_paused: false,
            send_paused: true,
            state: State::Open,
            listeners: Listeners::new(),
            events: Vec::new(),
        };
        socket.sync_pause();
        debug!("raw socket created: {:?}", socket.config);
        socket
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    pub fn is_recv_paused(&self) -> bool {
        self.recv_paused
    }

    pub fn is_send_paused(&self) -> bool {
        self.send_paused
    }

    /// Number of send requests waiting for a send-ready event.
    pub fn queued(&self) -> usize {
        self.requests.len()
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    pub fn native_mut(&mut self) -> &mut N {
        &mut self.native
    }

    /// Listens for inbound packets. Each listener receives its own copy of the
    /// packet, IP header included, and the sender's address.
    pub fn on_message<F>(&mut self, listener: F) -> &mut Self
        where F: FnMut(Vec<u8>, IpAddr) + 'static
    {
        self.listeners.add_message(Box::new(listener));
        self
    }

    pub fn on_error<F>(&mut self, listener: F) -> &mut Self
        where F: FnMut(&Error) + 'static
    {
        self.listeners.add_error(Box::new(listener));
        self
    }

    pub fn on_close<F>(&mut self, listener: F) -> &mut Self
        where F: FnMut() + 'static
    {
        self.listeners.add_close(Box::new(listener));
        self
    }

    /// Queues `buffer[offset..offset + length]` for `address`, an IPv4 or
    /// IPv6 literal; IPv6 may name its scope as `%index` or `%interface`.
    ///
    /// Bad bounds, an unparsable address or a closed socket are reported to
    /// `callback` before this returns; nothing is queued in that case.
    /// Otherwise `callback` runs once the packet has been handed to the OS,
    /// with the number of bytes sent.
    pub fn send<B, F>(&mut self,
                      buffer: B,
                      offset: usize,
                      length: usize,
                      address: &str,
                      callback: F)
                      -> &mut Self
        where B: AsRef<[u8]> + 'static,
              F: FnOnce(Result<usize>) + 'static
    {
        if self.state != State::Open {
            callback(Err(Error::Closed));
            return self;
        }

        let len = buffer.as_ref().len();
        match offset.checked_add(length) {
            Some(end) if end <= len => (),
            _ => {
                callback(Err(Error::Bounds {
                    len: len,
                    offset: offset,
                    length: length,
                }));
                return self;
            }
        }

        let (address, scope_id) = match platform::parse_address(address) {
            Some(parsed) => parsed,
            None => {
                callback(Err(Error::InvalidAddress(address.to_owned())));
                return self;
            }
        };

        self.requests.push_back(SendRequest {
            buffer: Box::new(buffer),
            offset: offset,
            length: length,
            address: address,
            scope_id: scope_id,
            callback: Box::new(callback),
        });
        trace!("queued {} bytes for {} ({} pending)",
               length,
               address,
               self.requests.len());

        if self.send_paused {
            self.resume_send();
        }
        self
    }

    /// `send` without a completion callback; failures are only logged.
    pub fn send_detached<B>(&mut self,
                            buffer: B,
                            offset: usize,
                            length: usize,
                            address: &str)
                            -> &mut Self
        where B: AsRef<[u8]> + 'static
    {
        self.send(buffer, offset, length, address, |result| if let Err(err) = result {
            debug!("detached send failed: {}", err);
        })
    }

    /// Starts closing. The `close` event follows once the native socket
    /// confirms.
    pub fn close(&mut self) -> &mut Self {
        if self.state == State::Open {
            self.state = State::Closing;
            self.native.close();
        }
        self
    }

    pub fn get_option(&self,
                      level: SocketLevel,
                      option: SocketOption,
                      value: &mut [u8])
                      -> Result<usize> {
        self.check_open()?;
        Ok(self.native.get_option(level.as_raw(), option.as_raw(), value)?)
    }

    pub fn get_option_int(&self, level: SocketLevel, option: SocketOption) -> Result<i32> {
        let mut value = [0; 4];
        let len = self.get_option(level, option, &mut value)?;
        // Some boolean options come back as a single byte.
        if len == 1 {
            return Ok(value[0] as i32);
        }
        Ok(NativeEndian::read_i32(&value))
    }

    pub fn set_option(&mut self, opt: &SockOpt) -> Result<()> {
        self.check_open()?;

        let mut value = opt.value.encode();
        if let Some(length) = opt.length {
            if length > value.len() {
                return Err(Error::Bounds {
                    len: value.len(),
                    offset: 0,
                    length: length,
                });
            }
            value.truncate(length);
        }

        self.native.set_option(opt.level.as_raw(), opt.option.as_raw(), &value)?;
        Ok(())
    }

    pub fn pause_recv(&mut self) -> &mut Self {
        self.recv_paused = true;
        self.sync_pause();
        self
    }

    pub fn resume_recv(&mut self) -> &mut Self {
        self.recv_paused = false;
        self.sync_pause();
        self
    }

    pub fn pause_send(&mut self) -> &mut Self {
        self.send_paused = true;
        self.sync_pause();
        self
    }

    pub fn resume_send(&mut self) -> &mut Self {
        self.send_paused = false;
        self.sync_pause();
        self
    }

    /// Waits up to `timeout` for native events and dispatches them, returning
    /// how many were handled.
    ///
    /// An `error` with no listener registered is returned as `Err` after the
    /// socket has been told to close.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<usize> {
        if self.state == State::Closed {
            return Ok(0);
        }

        let mut events = mem::replace(&mut self.events, Vec::new());
        if let Err(err) = self.native.wait(timeout, &mut events) {
            self.events = events;
            self.handle_error(Error::Io(err))?;
            return Ok(1);
        }

        let count = events.len();
        let mut result = Ok(count);
        for event in events.drain(..) {
            if let Err(err) = self.dispatch(event) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        self.events = events;
        result
    }

    /// Handles one native event. Lets an external event loop drive the
    /// socket instead of `poll`.
    pub fn dispatch(&mut self, event: Event) -> Result<()> {
        if self.state == State::Closed {
            trace!("ignoring {:?} on closed socket", event);
            return Ok(());
        }

        match event {
            Event::SendReady | Event::RecvReady if self.state == State::Closing => {
                trace!("ignoring {:?} while closing", event);
                Ok(())
            }
            Event::SendReady => {
                self.handle_send_ready();
                Ok(())
            }
            Event::RecvReady => self.handle_recv_ready(),
            Event::Error(err) => self.handle_error(Error::Io(err)),
            Event::Close => {
                self.handle_close();
                Ok(())
            }
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn sync_pause(&mut self) {
        trace!("pause recv={} send={}", self.recv_paused, self.send_paused);
        self.native.pause(self.recv_paused, self.send_paused);
    }

    fn handle_send_ready(&mut self) {
        let request = match self.requests.pop_front() {
            Some(request) => request,
            None => {
                if !self.send_paused {
                    self.pause_send();
                }
                return;
            }
        };

        let result = self.transmit(&request);
        if let Err(ref err) = result {
            debug!("send to {} failed: {}", request.address, err);
        }
        (request.callback)(result);
    }

    fn transmit(&mut self, request: &SendRequest) -> Result<usize> {
        let payload = request.payload();
        if !self.config.generate_checksums {
            return Ok(self.native.send(payload, request.address, request.scope_id)?);
        }

        let offset = self.config.checksum_offset;
        match offset.checked_add(2) {
            Some(end) if end <= payload.len() => (),
            _ => {
                return Err(Error::ChecksumOffset {
                    offset: offset,
                    length: payload.len(),
                })
            }
        }

        let mut packet = payload.to_vec();
        checksum::write(&mut packet, offset, 0)?;
        let sum = checksum::compute_one(&packet);
        checksum::write(&mut packet, offset, sum)?;
        Ok(self.native.send(&packet, request.address, request.scope_id)?)
    }

    fn handle_recv_ready(&mut self) -> Result<()> {
        match self.native.recv(&mut self.buffer) {
            Ok((bytes, source)) => {
                let bytes = cmp::min(bytes, self.buffer.len());
                let data = self.buffer[..bytes].to_vec();
                trace!("received {} bytes from {}", bytes, source);
                self.listeners.emit_message(data, source);
                Ok(())
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                trace!("spurious recv-ready");
                Ok(())
            }
            Err(err) => self.emit_error(Error::Io(err)),
        }
    }

    fn handle_error(&mut self, err: Error) -> Result<()> {
        let result = self.emit_error(err);
        self.close();
        result
    }

    fn emit_error(&mut self, err: Error) -> Result<()> {
        if !self.listeners.has_error_listener() {
            error!("unhandled raw socket error: {}", err);
            return Err(err);
        }
        self.listeners.emit_error(&err);
        Ok(())
    }

    fn handle_close(&mut self) {
        self.state = State::Closed;
        self.fail_pending();
        debug!("raw socket closed");
        self.listeners.emit_close();
    }

    fn fail_pending(&mut self) {
        if self.requests.is_empty() {
            return;
        }
        warn!("dropping {} queued send requests", self.requests.len());
        for request in self.requests.drain(..) {
            (request.callback)(Err(Error::Closed));
        }
    }
}

impl<N: Native + AsRawFd> AsRawFd for RawSocket<N> {
    fn as_raw_fd(&self) -> RawFd {
        self.native.as_raw_fd()
    }
}

impl<N: Native> fmt::Debug for RawSocket<N> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("RawSocket")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("queued", &self.requests.len())
            .field("recv_paused", &self.recv_paused)
            .field("send_paused", &self.send_paused)
            .finish()
    }
}

impl<N: Native> Drop for RawSocket<N> {
    fn drop(&mut self) {
        self.fail_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::options::{AddressFamily, Protocol};

    const STALE: u8 = 0xEE;

    #[derive(Default)]
    struct Script {
        sent: Vec<(Vec<u8>, IpAddr)>,
        scopes: Vec<u32>,
        failing_sends: VecDeque<bool>,
        incoming: VecDeque<io::Result<(Vec<u8>, IpAddr)>>,
        events: VecDeque<Event>,
        pauses: Vec<(bool, bool)>,
        options: Vec<(libc::c_int, libc::c_int, Vec<u8>)>,
        closes: usize,
        wait_error: Option<io::Error>,
    }

    struct MockNative {
        script: Rc<RefCell<Script>>,
    }

    impl Native for MockNative {
        fn open(protocol: Protocol, _family: AddressFamily) -> io::Result<Self> {
            if protocol == Protocol::NONE {
                return Err(io::Error::from_raw_os_error(libc::EPROTONOSUPPORT));
            }
            Ok(MockNative { script: Rc::new(RefCell::new(Script::default())) })
        }

        fn send(&mut self, buffer: &[u8], addr: IpAddr, scope_id: u32) -> io::Result<usize> {
            let mut script = self.script.borrow_mut();
            if script.failing_sends.pop_front().unwrap_or(false) {
                return Err(io::Error::from_raw_os_error(libc::EHOSTUNREACH));
            }
            script.sent.push((buffer.to_vec(), addr));
            script.scopes.push(scope_id);
            Ok(buffer.len())
        }

        fn recv(&mut self, buffer: &mut [u8]) -> io::Result<(usize, IpAddr)> {
            for byte in buffer.iter_mut() {
                *byte = STALE;
            }
            match self.script.borrow_mut().incoming.pop_front() {
                Some(Ok((data, source))) => {
                    buffer[..data.len()].copy_from_slice(&data);
                    Ok((data.len(), source))
                }
                Some(Err(err)) => Err(err),
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }

        fn get_option(&self,
                      _level: libc::c_int,
                      _option: libc::c_int,
                      value: &mut [u8])
                      -> io::Result<usize> {
            NativeEndian::write_i32(&mut value[..4], 212992);
            Ok(4)
        }

        fn set_option(&mut self,
                      level: libc::c_int,
                      option: libc::c_int,
                      value: &[u8])
                      -> io::Result<()> {
            self.script.borrow_mut().options.push((level, option, value.to_vec()));
            Ok(())
        }

        fn pause(&mut self, recv_paused: bool, send_paused: bool) {
            self.script.borrow_mut().pauses.push((recv_paused, send_paused));
        }

        fn close(&mut self) {
            let mut script = self.script.borrow_mut();
            script.closes += 1;
            script.events.push_back(Event::Close);
        }

        fn wait(&mut self, _timeout: Option<Duration>, events: &mut Vec<Event>) -> io::Result<()> {
            let mut script = self.script.borrow_mut();
            if let Some(err) = script.wait_error.take() {
                return Err(err);
            }
            events.extend(script.events.drain(..));
            Ok(())
        }
    }

    type Log = Rc<RefCell<Vec<String>>>;

    fn udp_socket() -> RawSocket<MockNative> {
        RawSocket::open(SocketConfig::new(Protocol::UDP)).unwrap()
    }

    fn script(socket: &RawSocket<MockNative>) -> Rc<RefCell<Script>> {
        socket.native().script.clone()
    }

    fn recorder(log: &Log, name: &'static str) -> impl FnOnce(Result<usize>) {
        let log = log.clone();
        move |result| {
            let entry = match result {
                Ok(bytes) => format!("{}:ok:{}", name, bytes),
                Err(err) => format!("{}:err:{}", name, err),
            };
            log.borrow_mut().push(entry);
        }
    }

    fn addr(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    #[test]
    fn test_construction_failure_is_returned() {
        match RawSocket::<MockNative>::open(SocketConfig::default()) {
            Err(Error::Io(err)) => assert_eq!(err.raw_os_error(), Some(libc::EPROTONOSUPPORT)),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_initial_state() {
        let socket = udp_socket();
        assert_eq!(socket.state(), State::Open);
        assert!(socket.is_send_paused());
        assert!(!socket.is_recv_paused());
        assert_eq!(socket.queued(), 0);
        assert_eq!(script(&socket).borrow().pauses, vec![(false, true)]);
    }

    #[test]
    fn test_udp_send() {
        let mut socket = udp_socket();
        let script = script(&socket);
        let log = Log::default();
        let buf: Vec<u8> = (0..32).collect();

        socket.send(buf.clone(), 0, 20, "192.168.1.1", recorder(&log, "a"));
        assert_eq!(socket.queued(), 1);
        assert!(!socket.is_send_paused());
        assert!(script.borrow().sent.is_empty());
        assert!(log.borrow().is_empty());

        socket.dispatch(Event::SendReady).unwrap();
        assert_eq!(script.borrow().sent, vec![(buf[..20].to_vec(), addr("192.168.1.1"))]);
        assert_eq!(*log.borrow(), vec!["a:ok:20".to_string()]);
        assert_eq!(socket.queued(), 0);
    }

    #[test]
    fn test_send_window_with_offset() {
        let mut socket = udp_socket();
        let script = script(&socket);
        let buf: Vec<u8> = (0..10).collect();

        socket.send_detached(buf, 4, 3, "::1");
        socket.dispatch(Event::SendReady).unwrap();
        assert_eq!(script.borrow().sent, vec![(vec![4, 5, 6], addr("::1"))]);
    }

    #[test]
    fn test_send_bounds_error_is_synchronous() {
        let mut socket = udp_socket();
        let script = script(&socket);
        let log = Log::default();

        socket.send(vec![0u8; 25], 10, 20, "10.0.0.1", recorder(&log, "a"));
        assert_eq!(log.borrow().len(), 1);
        assert!(log.borrow()[0].starts_with("a:err:buffer length '25'"));
        assert_eq!(socket.queued(), 0);
        assert!(socket.is_send_paused());

        socket.dispatch(Event::SendReady).unwrap();
        assert!(script.borrow().sent.is_empty());
    }

    #[test]
    fn test_send_bounds_overflow() {
        let mut socket = udp_socket();
        let log = Log::default();
        socket.send(vec![0u8; 4], usize::max_value(), 2, "10.0.0.1", recorder(&log, "a"));
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(socket.queued(), 0);
    }

    #[test]
    fn test_send_invalid_address() {
        let mut socket = udp_socket();
        let log = Log::default();

        socket.send(vec![0u8; 10], 0, 10, "not-an-ip", recorder(&log, "a"));
        assert_eq!(*log.borrow(), vec!["a:err:invalid IP address 'not-an-ip'".to_string()]);
        assert_eq!(socket.queued(), 0);
    }

    #[test]
    fn test_send_scoped_ipv6() {
        let mut socket = udp_socket();
        let script = script(&socket);
        let log = Log::default();

        socket.send(vec![0u8; 8], 0, 8, "fe80::1%3", recorder(&log, "a"))
            .send(vec![0u8; 8], 0, 8, "fe80::2", recorder(&log, "b"));
        assert_eq!(socket.queued(), 2);
        socket.dispatch(Event::SendReady).unwrap();
        socket.dispatch(Event::SendReady).unwrap();

        assert_eq!(*log.borrow(), vec!["a:ok:8".to_string(), "b:ok:8".to_string()]);
        let script = script.borrow();
        assert_eq!(script.sent[0].1, addr("fe80::1"));
        assert_eq!(script.scopes, vec![3, 0]);
    }

    #[test]
    fn test_send_bad_zone() {
        let mut socket = udp_socket();
        let log = Log::default();

        socket.send(vec![0u8; 8], 0, 8, "fe80::1%", recorder(&log, "a"))
            .send(vec![0u8; 8], 0, 8, "10.0.0.1%1", recorder(&log, "b"))
            .send(vec![0u8; 8], 0, 8, "fe80::1%no-such-if0", recorder(&log, "c"));
        assert_eq!(*log.borrow(),
                   vec!["a:err:invalid IP address 'fe80::1%'".to_string(),
                        "b:err:invalid IP address '10.0.0.1%1'".to_string(),
                        "c:err:invalid IP address 'fe80::1%no-such-if0'".to_string()]);
        assert_eq!(socket.queued(), 0);
    }

    #[test]
    fn test_sends_complete_in_order() {
        let mut socket = udp_socket();
        let script = script(&socket);
        let log = Log::default();

        socket.send(vec![1u8], 0, 1, "10.0.0.1", recorder(&log, "first"))
            .send(vec![2u8, 2], 0, 2, "10.0.0.2", recorder(&log, "second"))
            .send(vec![3u8, 3, 3], 0, 3, "10.0.0.3", recorder(&log, "third"));
        assert_eq!(socket.queued(), 3);

        for _ in 0..3 {
            socket.dispatch(Event::SendReady).unwrap();
        }
        assert_eq!(*log.borrow(),
                   vec!["first:ok:1".to_string(),
                        "second:ok:2".to_string(),
                        "third:ok:3".to_string()]);
        let sent: Vec<IpAddr> = script.borrow().sent.iter().map(|s| s.1).collect();
        assert_eq!(sent, vec![addr("10.0.0.1"), addr("10.0.0.2"), addr("10.0.0.3")]);
    }

    #[test]
    fn test_drained_queue_pauses_and_send_resumes() {
        let mut socket = udp_socket();
        let script = script(&socket);

        socket.send_detached(vec![0u8; 8], 0, 8, "10.0.0.1");
        socket.dispatch(Event::SendReady).unwrap();
        assert!(!socket.is_send_paused());

        socket.dispatch(Event::SendReady).unwrap();
        assert!(socket.is_send_paused());
        assert_eq!(script.borrow().pauses.last(), Some(&(false, true)));

        let pauses = script.borrow().pauses.len();
        socket.dispatch(Event::SendReady).unwrap();
        assert_eq!(script.borrow().pauses.len(), pauses);

        socket.send_detached(vec![1u8; 8], 0, 8, "10.0.0.1");
        assert!(!socket.is_send_paused());
        assert_eq!(script.borrow().pauses.last(), Some(&(false, false)));
        socket.dispatch(Event::SendReady).unwrap();
        assert_eq!(script.borrow().sent.len(), 2);
    }

    #[test]
    fn test_failed_send_stays_with_its_request() {
        let mut socket = udp_socket();
        let script = script(&socket);
        let log = Log::default();
        let errors = Rc::new(RefCell::new(0));
        let counter = errors.clone();
        socket.on_error(move |_| *counter.borrow_mut() += 1);

        script.borrow_mut().failing_sends.push_back(true);
        socket.send(vec![0u8; 4], 0, 4, "10.0.0.1", recorder(&log, "a"))
            .send(vec![0u8; 6], 0, 6, "10.0.0.1", recorder(&log, "b"));

        socket.dispatch(Event::SendReady).unwrap();
        socket.dispatch(Event::SendReady).unwrap();

        let log = log.borrow();
        assert!(log[0].starts_with("a:err:I/O error"));
        assert_eq!(log[1], "b:ok:6");
        assert_eq!(*errors.borrow(), 0);
        assert_eq!(socket.state(), State::Open);
    }

    #[test]
    fn test_receive_is_sliced_to_packet() {
        let mut socket = udp_socket();
        let script = script(&socket);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        socket.on_message(move |data, source| sink.borrow_mut().push((data, source)));

        let packet: Vec<u8> = (1..29).collect();
        script.borrow_mut().incoming.push_back(Ok((packet.clone(), addr("10.0.0.5"))));
        socket.dispatch(Event::RecvReady).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.len(), 28);
        assert_eq!(seen[0].0, packet);
        assert!(!seen[0].0.contains(&STALE));
        assert_eq!(seen[0].1, addr("10.0.0.5"));
    }

    #[test]
    fn test_messages_outlive_the_next_receive() {
        let mut socket = udp_socket();
        let script = script(&socket);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        socket.on_message(move |data, _| sink.borrow_mut().push(data));

        script.borrow_mut().incoming.push_back(Ok((vec![1; 40], addr("10.0.0.5"))));
        script.borrow_mut().incoming.push_back(Ok((vec![2; 8], addr("10.0.0.6"))));
        socket.dispatch(Event::RecvReady).unwrap();
        socket.dispatch(Event::RecvReady).unwrap();

        assert_eq!(*seen.borrow(), vec![vec![1; 40], vec![2; 8]]);
    }

    #[test]
    fn test_spurious_recv_ready() {
        let mut socket = udp_socket();
        let messages = Rc::new(RefCell::new(0));
        let counter = messages.clone();
        socket.on_message(move |_, _| *counter.borrow_mut() += 1);

        socket.dispatch(Event::RecvReady).unwrap();
        assert_eq!(*messages.borrow(), 0);
    }

    #[test]
    fn test_failed_receive_keeps_pumping() {
        let mut socket = udp_socket();
        let script = script(&socket);
        let log = Log::default();
        let errors = log.clone();
        socket.on_error(move |err| errors.borrow_mut().push(format!("error:{}", err)));
        let messages = log.clone();
        socket.on_message(move |data, _| messages.borrow_mut().push(format!("message:{}", data.len())));

        script.borrow_mut()
            .incoming
            .push_back(Err(io::Error::from_raw_os_error(libc::ENOBUFS)));
        script.borrow_mut().incoming.push_back(Ok((vec![0; 20], addr("10.0.0.5"))));
        socket.dispatch(Event::RecvReady).unwrap();
        socket.dispatch(Event::RecvReady).unwrap();

        assert_eq!(log.borrow().len(), 2);
        assert!(log.borrow()[0].starts_with("error:"));
        assert_eq!(log.borrow()[1], "message:20");
        assert_eq!(socket.state(), State::Open);
        assert_eq!(script.borrow().closes, 0);
    }

    #[test]
    fn test_unheard_receive_error_is_returned() {
        let mut socket = udp_socket();
        let script = script(&socket);
        script.borrow_mut()
            .incoming
            .push_back(Err(io::Error::from_raw_os_error(libc::ENOBUFS)));

        assert!(socket.dispatch(Event::RecvReady).is_err());
        assert_eq!(socket.state(), State::Open);
    }

    #[test]
    fn test_native_error_closes_once() {
        let mut socket = udp_socket();
        let script = script(&socket);
        let log = Log::default();
        let errors = log.clone();
        socket.on_error(move |_| errors.borrow_mut().push("error".to_string()));
        let closes = log.clone();
        socket.on_close(move || closes.borrow_mut().push("close".to_string()));

        socket.dispatch(Event::Error(io::Error::from_raw_os_error(libc::EBADF))).unwrap();
        assert_eq!(socket.state(), State::Closing);
        socket.dispatch(Event::Error(io::Error::from_raw_os_error(libc::EBADF))).unwrap();
        assert_eq!(script.borrow().closes, 1);

        assert_eq!(socket.poll(None).unwrap(), 1);
        assert!(socket.is_closed());
        assert_eq!(socket.poll(None).unwrap(), 0);
        assert_eq!(*log.borrow(),
                   vec!["error".to_string(), "error".to_string(), "close".to_string()]);
    }

    #[test]
    fn test_unheard_native_error_still_closes() {
        let mut socket = udp_socket();
        let script = script(&socket);
        script.borrow_mut().events.push_back(Event::Error(io::Error::from_raw_os_error(libc::EIO)));

        match socket.poll(None) {
            Err(Error::Io(err)) => assert_eq!(err.raw_os_error(), Some(libc::EIO)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(socket.state(), State::Closing);
        socket.poll(None).unwrap();
        assert!(socket.is_closed());
    }

    #[test]
    fn test_wait_failure_is_fatal() {
        let mut socket = udp_socket();
        let script = script(&socket);
        let errors = Rc::new(RefCell::new(0));
        let counter = errors.clone();
        socket.on_error(move |_| *counter.borrow_mut() += 1);

        script.borrow_mut().wait_error = Some(io::Error::from_raw_os_error(libc::EBADF));
        assert_eq!(socket.poll(None).unwrap(), 1);
        assert_eq!(*errors.borrow(), 1);
        assert_eq!(socket.state(), State::Closing);
    }

    #[test]
    fn test_poll_dispatches_in_order() {
        let mut socket = udp_socket();
        let script = script(&socket);
        let log = Log::default();
        let messages = log.clone();
        socket.on_message(move |_, source| messages.borrow_mut().push(format!("message:{}", source)));

        socket.send(vec![0u8; 4], 0, 4, "10.0.0.1", recorder(&log, "send"));
        {
            let mut script = script.borrow_mut();
            script.incoming.push_back(Ok((vec![0; 28], addr("10.0.0.5"))));
            script.events.push_back(Event::RecvReady);
            script.events.push_back(Event::SendReady);
        }

        assert_eq!(socket.poll(Some(Duration::from_millis(10))).unwrap(), 2);
        assert_eq!(*log.borrow(),
                   vec!["message:10.0.0.5".to_string(), "send:ok:4".to_string()]);
    }

    #[test]
    fn test_close_fails_queued_requests_first() {
        let mut socket = udp_socket();
        let log = Log::default();
        let closes = log.clone();
        socket.on_close(move || closes.borrow_mut().push("close".to_string()));

        socket.send(vec![0u8; 4], 0, 4, "10.0.0.1", recorder(&log, "a"))
            .send(vec![0u8; 4], 0, 4, "10.0.0.1", recorder(&log, "b"))
            .close();
        assert_eq!(socket.state(), State::Closing);
        assert!(log.borrow().is_empty());

        socket.poll(None).unwrap();
        assert_eq!(*log.borrow(),
                   vec!["a:err:socket is closed".to_string(),
                        "b:err:socket is closed".to_string(),
                        "close".to_string()]);
        assert_eq!(socket.queued(), 0);
    }

    #[test]
    fn test_readiness_ignored_while_closing() {
        let mut socket = udp_socket();
        let script = script(&socket);
        let log = Log::default();
        let errors = log.clone();
        socket.on_error(move |err| errors.borrow_mut().push(format!("error:{}", err)));
        script.borrow_mut().incoming.push_back(Ok((vec![0; 20], addr("10.0.0.5"))));

        socket.send(vec![0u8; 4], 0, 4, "10.0.0.1", recorder(&log, "a")).close();
        socket.dispatch(Event::RecvReady).unwrap();
        socket.dispatch(Event::SendReady).unwrap();

        assert!(script.borrow().sent.is_empty());
        assert_eq!(script.borrow().incoming.len(), 1);
        assert!(log.borrow().is_empty());
        assert_eq!(socket.queued(), 1);

        socket.poll(None).unwrap();
        assert_eq!(*log.borrow(), vec!["a:err:socket is closed".to_string()]);
        assert!(socket.is_closed());
    }

    #[test]
    fn test_send_after_close() {
        let mut socket = udp_socket();
        let log = Log::default();
        socket.close();
        socket.send(vec![0u8; 4], 0, 4, "10.0.0.1", recorder(&log, "a"));
        assert_eq!(*log.borrow(), vec!["a:err:socket is closed".to_string()]);
        assert_eq!(socket.queued(), 0);
    }

    #[test]
    fn test_dropped_socket_fails_queued_requests() {
        let log = Log::default();
        {
            let mut socket = udp_socket();
            socket.send(vec![0u8; 4], 0, 4, "10.0.0.1", recorder(&log, "a"));
        }
        assert_eq!(*log.borrow(), vec!["a:err:socket is closed".to_string()]);
    }

    #[test]
    fn test_pause_forwards_both_flags() {
        let mut socket = udp_socket();
        let script = script(&socket);

        socket.pause_recv().pause_recv().resume_send().resume_recv().pause_send();
        assert_eq!(script.borrow().pauses,
                   vec![(false, true),
                        (true, true),
                        (true, true),
                        (true, false),
                        (false, false),
                        (false, true)]);
    }

    #[test]
    fn test_set_option_forwards() {
        let mut socket = udp_socket();
        let script = script(&socket);

        socket.set_option(&SockOpt::of(SocketOption::IpHdrIncl, true)).unwrap();
        socket.set_option(&SockOpt::new(SocketLevel::Ip, SocketOption::IpTtl, 64).with_length(1))
            .unwrap();

        let script = script.borrow();
        let options = &script.options;
        assert_eq!(options[0],
                   (libc::IPPROTO_IP, libc::IP_HDRINCL, 1i32.to_ne_bytes().to_vec()));
        assert_eq!(options[1].1, libc::IP_TTL);
        assert_eq!(options[1].2.len(), 1);
    }

    #[test]
    fn test_set_option_length_too_long() {
        let mut socket = udp_socket();
        let opt = SockOpt::of(SocketOption::IpTtl, 64).with_length(8);
        match socket.set_option(&opt) {
            Err(Error::Bounds { len: 4, length: 8, .. }) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_get_option() {
        let socket = udp_socket();
        assert_eq!(socket.get_option_int(SocketLevel::Socket, SocketOption::RcvBuf).unwrap(),
                   212992);
    }

    #[test]
    fn test_options_after_close() {
        let mut socket = udp_socket();
        socket.close();
        assert!(socket.get_option_int(SocketLevel::Socket, SocketOption::RcvBuf)
            .unwrap_err()
            .is_closed());
        assert!(socket.set_option(&SockOpt::of(SocketOption::IpTtl, 1)).unwrap_err().is_closed());
    }

    #[test]
    fn test_generated_checksum() {
        let config = SocketConfig::new(Protocol::ICMP).generate_checksums(2);
        let mut socket = RawSocket::<MockNative>::open(config).unwrap();
        let script = script(&socket);

        // ICMP echo request with garbage in the checksum field.
        let echo: Rc<[u8]> = Rc::from(vec![0x08, 0x00, 0xAB, 0xCD, 0x00, 0x01, 0x00, 0x01, 0x61]);
        socket.send_detached(echo.clone(), 0, echo.len(), "127.0.0.1");
        socket.dispatch(Event::SendReady).unwrap();

        let sent = script.borrow().sent[0].0.clone();
        assert_eq!(checksum::compute_one(&sent), 0);
        assert_eq!(&sent[4..], &echo[4..]);
        assert_eq!(&echo[2..4], &[0xAB, 0xCD]);
    }

    #[test]
    fn test_generated_checksum_offset_outside_packet() {
        let config = SocketConfig::new(Protocol::ICMP).generate_checksums(2);
        let mut socket = RawSocket::<MockNative>::open(config).unwrap();
        let script = script(&socket);
        let log = Log::default();

        socket.send(vec![0u8; 8], 0, 3, "127.0.0.1", recorder(&log, "a"));
        socket.dispatch(Event::SendReady).unwrap();

        assert!(log.borrow()[0].starts_with("a:err:checksum offset '2'"));
        assert!(script.borrow().sent.is_empty());
    }
}
