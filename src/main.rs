use std::io::{Read, Write};
use std::net::Ipv4Addr;

use clap::Parser;
use log::info;

use ustcp::{Endpoint, Stack};

/// Demo server: brings up a TUN interface, listens on one port, and echoes whatever it reads.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TUN device name to create.
    #[arg(short, long, default_value = "tun0")]
    device: String,

    /// Local IPv4 address for the interface.
    #[arg(short, long, default_value = "10.10.10.10")]
    addr: Ipv4Addr,

    /// Netmask for the interface.
    #[arg(short, long, default_value = "255.255.255.0")]
    netmask: Ipv4Addr,

    /// TCP port to listen on.
    #[arg(short, long, default_value_t = 9090)]
    port: u16,

    /// Log verbosity, e.g. "info", "ustcp=debug".
    #[arg(short, long, default_value = "info")]
    log: String,
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log)).init();

    let stack = Stack::new(&args.device, args.addr, args.netmask, None)
        .expect("failed to bring up the interface");

    let listener = stack.listen(Endpoint::new(args.addr, args.port));
    info!("listening on {}:{}", args.addr, args.port);

    loop {
        let mut stream = match listener.accept() {
            Ok(stream) => stream,
            Err(err) => {
                log::error!("accept failed: {err}");
                continue;
            }
        };
        info!("accepted a connection");

        let mut buf = [0u8; 4096];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if stream.write_all(&buf[..n]).is_err() {
                break;
            }
        }
        info!("connection closed");
    }
}
