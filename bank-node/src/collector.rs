use bank_commons::codec::write_frame;
use bank_commons::{CollectorRecord, Message};
use tokio::net::TcpStream;

/// Ships completed snapshots to the state collector (spec.md §4.5). The
/// connection is made once, at startup, with a greeting frame; after that,
/// delivery is best-effort — a delivery failure is logged and the report is
/// dropped, it does not affect the node's own state (Non-goal: "no
/// guaranteed collector delivery").
pub struct CollectorReporter {
    stream: Option<TcpStream>,
}

impl CollectorReporter {
    pub async fn connect(bank_id: &str, addr: &str) -> Self {
        match TcpStream::connect(addr).await {
            Ok(mut stream) => {
                let greeting = Message::Greeting(format!("Bank '{bank_id}' connected."));
                if let Err(err) = write_frame(&mut stream, &greeting).await {
                    tracing::warn!(%err, collector = addr, "failed to send greeting to collector");
                }
                tracing::info!(collector = addr, "connected to state collector");
                Self {
                    stream: Some(stream),
                }
            }
            Err(err) => {
                tracing::warn!(
                    %err,
                    collector = addr,
                    "failed to connect to state collector; reports will be dropped"
                );
                Self { stream: None }
            }
        }
    }

    pub async fn report(&mut self, record: CollectorRecord) {
        let Some(stream) = self.stream.as_mut() else {
            tracing::warn!(
                marker_id = %record.marker_id,
                "no collector connection; dropping snapshot report"
            );
            return;
        };
        if let Err(err) = write_frame(stream, &record).await {
            tracing::warn!(
                %err,
                marker_id = %record.marker_id,
                "failed to deliver snapshot report; dropping it"
            );
            self.stream = None;
        }
    }
}
