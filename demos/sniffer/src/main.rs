//! Prints a line for every packet seen on raw UDP, TCP and ICMP sockets.
//!
//! Needs CAP_NET_RAW (or root).

mod ipv4;

use std::process;
use std::time::Duration;

use rawsock::{Protocol, RawSocket, SocketConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn open(name: &'static str, protocol: Protocol) -> rawsock::Result<RawSocket> {
    let mut socket = RawSocket::create(SocketConfig::new(protocol))?;
    socket.on_message(move |buffer, _| {
            match ipv4::Packet::new(&buffer[..]) {
                Some(packet) => {
                    println!("{} {} => {} | {} bytes",
                             name,
                             packet.src_addr(),
                             packet.dst_addr(),
                             packet.payload().len())
                }
                None => println!("{} <non-IPv4> | {} bytes", name, buffer.len()),
            }
        })
        .on_error(move |err| eprintln!("{}: {}", name, err))
        .on_close(move || eprintln!("{}: closed", name));
    Ok(socket)
}

fn run() -> rawsock::Result<()> {
    let mut sockets = vec![open("UDP", Protocol::UDP)?,
                           open("TCP", Protocol::TCP)?,
                           open("ICMP", Protocol::ICMP)?];
    println!("START");

    while sockets.iter().any(|socket| !socket.is_closed()) {
        for socket in &mut sockets {
            socket.poll(Some(POLL_INTERVAL))?;
        }
    }
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}
