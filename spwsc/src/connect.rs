use std::time::Duration;

use clap::Args;
use spws::{Options, SpProtocol};
use tokio::{net::TcpStream, runtime, time::timeout};
use url::Url;

/// Connects to a server and performs the client side of the handshake.
#[derive(Args)]
#[command(alias = "c")]
pub struct Cmd {
    /// Maximum duration of the handshake, TCP connection excluded.
    /// Accepts human-readable formats like "5s", "1m", "500ms".
    #[arg(short, long, value_parser = humantime::parse_duration, default_value = "5s")]
    timeout: Duration,

    /// Maximum duration to wait for the TCP connection.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    connect_timeout: Duration,

    /// Scalability protocol of the local socket (pair, req, sub, ...).
    #[arg(short, long, default_value = "pair")]
    protocol: SpProtocol,

    /// The server URL (ws://)
    url: Url,
}

pub fn run(cmd: Cmd) -> anyhow::Result<()> {
    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(connect(cmd))
}

async fn connect(cmd: Cmd) -> anyhow::Result<()> {
    let addrs = cmd.url.socket_addrs(|| Some(80))?;
    let stream = timeout(cmd.connect_timeout, TcpStream::connect(&*addrs)).await??;
    stream.set_nodelay(true)?;

    let options = Options::default()
        .with_protocol(cmd.protocol)
        .with_timeout(cmd.timeout);
    let upgraded = spws::connect_url(stream, cmd.url.as_str(), options)?.await?;

    let negotiated = upgraded.negotiated();
    println!(
        "> Connected to {} as {} ({})",
        cmd.url,
        negotiated.protocol,
        negotiated.protocol.as_ws_str()
    );

    Ok(())
}
