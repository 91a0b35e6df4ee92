use std::{net::SocketAddr, time::Duration};

use clap::Args;
use spws::{Options, SpProtocol};
use tokio::{net::TcpListener, runtime};

/// Accepts connections and performs the server side of the handshake on each.
#[derive(Args)]
#[command(alias = "l")]
pub struct Cmd {
    /// Maximum duration of each handshake.
    /// Accepts human-readable formats like "5s", "1m", "500ms".
    #[arg(short, long, value_parser = humantime::parse_duration, default_value = "5s")]
    timeout: Duration,

    /// Scalability protocol of the local socket (pair, rep, pub, ...).
    #[arg(short, long, default_value = "pair")]
    protocol: SpProtocol,

    /// Drops rejected clients without an HTTP error answer.
    #[arg(long)]
    fail_closed: bool,

    /// Exits after the first handshake.
    #[arg(long)]
    once: bool,

    /// Address to listen on.
    #[arg(default_value = "127.0.0.1:5555")]
    addr: SocketAddr,
}

pub fn run(cmd: Cmd) -> anyhow::Result<()> {
    let runtime = runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(listen(cmd))
}

async fn listen(cmd: Cmd) -> anyhow::Result<()> {
    let listener = TcpListener::bind(cmd.addr).await?;
    println!(
        "> Listening on ws://{} as {}",
        listener.local_addr()?,
        cmd.protocol
    );

    let mut options = Options::default()
        .with_protocol(cmd.protocol)
        .with_timeout(cmd.timeout);
    if cmd.fail_closed {
        options = options.without_error_reply();
    }

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => break,
        };

        let handshake = tokio::spawn(async move {
            match spws::accept(stream, options).await {
                Ok(upgraded) => match upgraded.negotiated().peer {
                    Some(protocol) => println!("< {peer}: upgraded, peer speaks {protocol}"),
                    None => println!("< {peer}: upgraded"),
                },
                Err(err) => println!("< {peer}: rejected ({err})"),
            }
        });

        if cmd.once {
            handshake.await?;
            break;
        }
    }

    Ok(())
}
