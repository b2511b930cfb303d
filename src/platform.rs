//! The native socket primitive: a non-blocking OS raw socket that reports
//! readiness as [`Event`]s.

use std::cmp;
use std::ffi::CString;
use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use log::{debug, trace};

use crate::options::{AddressFamily, Protocol};

#[derive(Debug)]
pub enum Event {
    SendReady,
    RecvReady,
    Error(io::Error),
    Close,
}

/// Operations the socket wrapper needs from the OS layer.
///
/// All calls are non-blocking except `wait`, which blocks for at most
/// `timeout` (forever when `None`) and appends whatever events are pending.
pub trait Native: Sized {
    fn open(protocol: Protocol, family: AddressFamily) -> io::Result<Self>;

    /// `scope_id` is only meaningful for IPv6 link-local destinations.
    fn send(&mut self, buffer: &[u8], addr: IpAddr, scope_id: u32) -> io::Result<usize>;

    fn recv(&mut self, buffer: &mut [u8]) -> io::Result<(usize, IpAddr)>;

    fn get_option(&self,
                  level: libc::c_int,
                  option: libc::c_int,
                  value: &mut [u8])
                  -> io::Result<usize>;

    fn set_option(&mut self,
                  level: libc::c_int,
                  option: libc::c_int,
                  value: &[u8])
                  -> io::Result<()>;

    /// Suppresses recv-ready and/or send-ready events.
    fn pause(&mut self, recv_paused: bool, send_paused: bool);

    /// Releases the descriptor. A single `Event::Close` follows on a later
    /// `wait`.
    fn close(&mut self);

    fn wait(&mut self, timeout: Option<Duration>, events: &mut Vec<Event>) -> io::Result<()>;
}

/// Parses an IPv4 or IPv6 literal. IPv6 may carry a `%zone` suffix naming
/// the scope either by index or by interface name.
pub fn parse_address(text: &str) -> Option<(IpAddr, u32)> {
    let mut parts = text.splitn(2, '%');
    let ip = parts.next()?;
    let zone = match parts.next() {
        Some(zone) => zone,
        None => return ip.parse::<IpAddr>().ok().map(|addr| (addr, 0)),
    };

    let ip = ip.parse::<Ipv6Addr>().ok()?;
    if zone.is_empty() {
        return None;
    }
    let scope_id = match zone.parse::<u32>() {
        Ok(index) => index,
        Err(_) => {
            let name = CString::new(zone).ok()?;
            let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
            if index == 0 {
                return None;
            }
            index
        }
    };
    Some((IpAddr::V6(ip), scope_id))
}

pub struct SysSocket {
    fd: libc::c_int,
    recv_paused: bool,
    send_paused: bool,
    close_pending: bool,
}

impl SysSocket {
    fn create(family: AddressFamily,
              kind: libc::c_int,
              protocol: Protocol)
              -> io::Result<libc::c_int> {
        let sockfd = unsafe { libc::socket(family.as_raw(), kind, protocol.as_raw()) };
        if sockfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sockfd)
    }

    fn set_nonblocking(fd: libc::c_int) -> io::Result<()> {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    fn check_open(&self) -> io::Result<()> {
        if self.fd < 0 {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket is closed"));
        }
        Ok(())
    }

    fn take_error(&self) -> io::Error {
        let mut value: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        let res = unsafe {
            libc::getsockopt(self.fd,
                             libc::SOL_SOCKET,
                             libc::SO_ERROR,
                             &mut value as *mut _ as *mut libc::c_void,
                             &mut len)
        };
        if res < 0 {
            io::Error::last_os_error()
        } else if value != 0 {
            io::Error::from_raw_os_error(value)
        } else {
            io::Error::new(io::ErrorKind::Other, "socket reported an error condition")
        }
    }
}

impl Native for SysSocket {
    fn open(protocol: Protocol, family: AddressFamily) -> io::Result<Self> {
        let fd = match Self::create(family, libc::SOCK_RAW, protocol) {
            Ok(fd) => fd,
            // Unprivileged ICMP is still available as a datagram socket on
            // some systems.
            Err(ref err) if protocol.is_icmp() &&
                            err.kind() == io::ErrorKind::PermissionDenied => {
                debug!("raw ICMP socket refused, falling back to SOCK_DGRAM");
                Self::create(family, libc::SOCK_DGRAM, protocol)?
            }
            Err(err) => return Err(err),
        };

        if let Err(err) = Self::set_nonblocking(fd) {
            unsafe {
                libc::close(fd);
            }
            return Err(err);
        }

        debug!("opened raw socket fd={} protocol={} family={:?}",
               fd,
               protocol.number(),
               family);
        Ok(SysSocket {
            fd: fd,
            recv_paused: false,
            send_paused: false,
            close_pending: false,
        })
    }

    fn send(&mut self, buffer: &[u8], addr: IpAddr, scope_id: u32) -> io::Result<usize> {
        self.check_open()?;

        let res = unsafe {
            match addr {
                IpAddr::V4(ip) => {
                    let mut sin: libc::sockaddr_in = mem::zeroed();
                    sin.sin_family = libc::AF_INET as libc::sa_family_t;
                    sin.sin_addr = libc::in_addr { s_addr: u32::from_ne_bytes(ip.octets()) };
                    libc::sendto(self.fd,
                                 buffer.as_ptr() as *const libc::c_void,
                                 buffer.len(),
                                 0,
                                 &sin as *const libc::sockaddr_in as *const libc::sockaddr,
                                 mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
                }
                IpAddr::V6(ip) => {
                    let mut sin6: libc::sockaddr_in6 = mem::zeroed();
                    sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                    sin6.sin6_addr.s6_addr = ip.octets();
                    sin6.sin6_scope_id = scope_id;
                    libc::sendto(self.fd,
                                 buffer.as_ptr() as *const libc::c_void,
                                 buffer.len(),
                                 0,
                                 &sin6 as *const libc::sockaddr_in6 as *const libc::sockaddr,
                                 mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
                }
            }
        };

        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(res as usize)
    }

    fn recv(&mut self, buffer: &mut [u8]) -> io::Result<(usize, IpAddr)> {
        self.check_open()?;

        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let res = unsafe {
            libc::recvfrom(self.fd,
                           buffer.as_mut_ptr() as *mut libc::c_void,
                           buffer.len(),
                           0,
                           &mut storage as *mut _ as *mut libc::sockaddr,
                           &mut len)
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        let source = match storage.ss_family as libc::c_int {
            libc::AF_INET => {
                let sin = unsafe { &*(&storage as *const _ as *const libc::sockaddr_in) };
                IpAddr::V4(Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()))
            }
            libc::AF_INET6 => {
                let sin6 = unsafe { &*(&storage as *const _ as *const libc::sockaddr_in6) };
                IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr))
            }
            family => {
                return Err(io::Error::new(io::ErrorKind::InvalidData,
                                          format!("unexpected source address family {}",
                                                  family)))
            }
        };

        Ok((res as usize, source))
    }

    fn get_option(&self,
                  level: libc::c_int,
                  option: libc::c_int,
                  value: &mut [u8])
                  -> io::Result<usize> {
        self.check_open()?;

        let mut len = value.len() as libc::socklen_t;
        let res = unsafe {
            libc::getsockopt(self.fd,
                             level,
                             option,
                             value.as_mut_ptr() as *mut libc::c_void,
                             &mut len)
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(len as usize)
    }

    fn set_option(&mut self,
                  level: libc::c_int,
                  option: libc::c_int,
                  value: &[u8])
                  -> io::Result<()> {
        self.check_open()?;

        let res = unsafe {
            libc::setsockopt(self.fd,
                             level,
                             option,
                             value.as_ptr() as *const libc::c_void,
                             value.len() as libc::socklen_t)
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn pause(&mut self, recv_paused: bool, send_paused: bool) {
        trace!("fd={} pause recv={} send={}", self.fd, recv_paused, send_paused);
        self.recv_paused = recv_paused;
        self.send_paused = send_paused;
    }

    fn close(&mut self) {
        if self.fd < 0 {
            return;
        }
        debug!("closing raw socket fd={}", self.fd);
        unsafe {
            libc::close(self.fd);
        }
        self.fd = -1;
        self.close_pending = true;
    }

    fn wait(&mut self, timeout: Option<Duration>, events: &mut Vec<Event>) -> io::Result<()> {
        if self.close_pending {
            self.close_pending = false;
            events.push(Event::Close);
            return Ok(());
        }
        if self.fd < 0 {
            return Ok(());
        }

        let mut interest = 0;
        if !self.recv_paused {
            interest |= libc::POLLIN;
        }
        if !self.send_paused {
            interest |= libc::POLLOUT;
        }

        let mut pollset = libc::pollfd {
            fd: self.fd,
            events: interest,
            revents: 0,
        };
        let timeout_ms = match timeout {
            Some(timeout) => cmp::min(timeout.as_millis(), libc::c_int::max_value() as u128) as libc::c_int,
            None => -1,
        };

        let ret = unsafe { libc::poll(&mut pollset as *mut libc::pollfd, 1, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        let revents = pollset.revents;
        if revents & libc::POLLNVAL != 0 {
            events.push(Event::Error(io::Error::from_raw_os_error(libc::EBADF)));
            return Ok(());
        }
        if revents & libc::POLLERR != 0 {
            events.push(Event::Error(self.take_error()));
            return Ok(());
        }
        if revents & libc::POLLOUT != 0 {
            events.push(Event::SendReady);
        }
        if revents & libc::POLLIN != 0 {
            events.push(Event::RecvReady);
        }
        Ok(())
    }
}

impl AsRawFd for SysSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for SysSocket {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}
