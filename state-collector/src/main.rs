use anyhow::{Context, Result};
use bank_commons::{CollectorRecord, Message};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

mod cli;
mod config;
mod logger;

use cli::Opts;

/// Every frame this process can see on a bank's link: the one-time greeting
/// sent when the link is established, or a completed snapshot report. Both
/// share the newline-delimited-JSON transport, but only the greeting is
/// shaped like a [`Message`]; this tries that shape first and falls back to
/// [`CollectorRecord`], since the two have disjoint required fields.
enum CollectorFrame {
    Greeting(String),
    Record(CollectorRecord),
}

fn decode_frame(line: &str) -> Result<CollectorFrame> {
    if let Ok(Message::Greeting(text)) = serde_json::from_str::<Message>(line) {
        return Ok(CollectorFrame::Greeting(text));
    }
    let record: CollectorRecord =
        serde_json::from_str(line).context("frame is neither a greeting nor a snapshot report")?;
    Ok(CollectorFrame::Record(record))
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::read();
    let data_dir = opts.data_dir().context("resolving data directory")?;

    let _log_guard = logger::init_tracing(&data_dir, opts.json)?;

    tracing::info!("starting global state collector");

    let ports = config::load_ports(&data_dir).context("loading collector configuration")?;
    if ports.is_empty() {
        tracing::warn!("no ports configured, collector has nothing to listen on");
    }

    let mut listeners = Vec::with_capacity(ports.len());
    for port in ports {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("binding collector port {port}"))?;
        tracing::info!(port, "listening for bank connections");
        listeners.push(listener);
    }

    // Each listener's accept loop never returns; wait on all of them so the
    // process stays up as long as at least one port is still bound.
    futures::future::join_all(listeners.into_iter().map(accept_forever)).await;

    Ok(())
}

async fn accept_forever(listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::info!(%addr, "bank connected");
                tokio::spawn(handle_connection(stream));
            }
            Err(err) => tracing::warn!(%err, "error accepting bank connection"),
        }
    }
}

async fn handle_connection(stream: TcpStream) {
    let peer_addr = stream.peer_addr().ok();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        let read = match reader.read_line(&mut line).await {
            Ok(read) => read,
            Err(err) => {
                tracing::warn!(?peer_addr, %err, "error reading from bank link");
                return;
            }
        };
        if read == 0 {
            tracing::info!(?peer_addr, "bank link closed");
            return;
        }
        match decode_frame(line.trim_end()) {
            Ok(CollectorFrame::Greeting(text)) => tracing::info!(?peer_addr, "{text}"),
            Ok(CollectorFrame::Record(record)) => tracing::info!(
                ?peer_addr,
                bank_id = %record.bank_id,
                marker_id = %record.marker_id,
                status = record.status,
                channel_messages = ?record.channel_messages,
                "received snapshot report"
            ),
            Err(err) => tracing::warn!(?peer_addr, %err, "malformed frame from bank link"),
        }
    }
}
