use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tracing::{debug, info, warn};

use crate::transport::{Connector, EventSink, FeedTarget, TransportEvent, TransportHandle};

/// WebSocket transport: one spawned reader task per session. `wss://` targets
/// go through rustls with the webpki root store.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(&mut self, target: &FeedTarget, sink: EventSink) -> Box<dyn TransportHandle> {
        install_crypto_provider();
        let url = target.url.to_string();
        let task = tokio::spawn(run_connection(url, sink));
        Box::new(WsHandle { task })
    }
}

/// Owns the reader task; aborting it drops the socket.
struct WsHandle {
    task: JoinHandle<()>,
}

impl TransportHandle for WsHandle {
    fn close(&mut self) {
        self.task.abort();
    }
}

impl Drop for WsHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_connection(url: String, sink: EventSink) {
    let session = sink.session();

    let mut stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!(%session, %url, error = %e, "feed connection failed");
            let _ = sink.send(TransportEvent::Failed(e.to_string())).await;
            return;
        }
    };

    info!(%session, %url, "feed connected");
    if !sink.send(TransportEvent::Opened).await {
        return;
    }

    while let Some(msg) = stream.next().await {
        let event = match msg {
            Ok(tungstenite::Message::Text(text)) => TransportEvent::Frame(text.as_str().to_owned()),
            Ok(tungstenite::Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => TransportEvent::Frame(text.to_owned()),
                Err(e) => {
                    warn!(%session, len = data.len(), error = %e, "dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(tungstenite::Message::Close(frame)) => {
                debug!(%session, ?frame, "feed sent close frame");
                break;
            }
            Ok(_) => continue,
            Err(e) if is_remote_close(&e) => {
                debug!(%session, error = %e, "feed connection dropped by remote");
                break;
            }
            Err(e) => {
                warn!(%session, error = %e, "feed transport error");
                let _ = sink.send(TransportEvent::Failed(e.to_string())).await;
                return;
            }
        };
        if !sink.send(event).await {
            return;
        }
    }

    info!(%session, "feed closed");
    let _ = sink.send(TransportEvent::Closed).await;
}

/// rustls needs a process-wide provider before the first TLS handshake.
/// Already installed is fine.
fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Errors that mean the far end went away rather than the transport breaking.
fn is_remote_close(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => true,
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        tungstenite::Error::Io(io_err) => matches!(
            io_err.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resets_count_as_remote_close() {
        assert!(is_remote_close(&tungstenite::Error::ConnectionClosed));
        assert!(is_remote_close(&tungstenite::Error::Protocol(
            ProtocolError::ResetWithoutClosingHandshake
        )));
        assert!(is_remote_close(&tungstenite::Error::Io(
            std::io::Error::from(std::io::ErrorKind::ConnectionReset)
        )));
    }

    #[tokio::test]
    async fn wss_target_attempts_tls_handshake() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Plain TCP peer: the TLS handshake cannot complete
            if let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        install_crypto_provider();
        let err = match tokio_tungstenite::connect_async(format!("wss://{}/ws?room=x", addr)).await
        {
            Ok(_) => panic!("Plain TCP peer accepted a TLS handshake"),
            Err(e) => e,
        };
        assert!(
            !matches!(
                err,
                tungstenite::Error::Url(tungstenite::error::UrlError::TlsFeatureNotEnabled)
            ),
            "{}",
            err
        );
    }

    #[tokio::test]
    async fn failed_wss_connect_reports_failure_event() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let session = crate::transport::SessionId(1);
        let endpoint = crate::transport::FeedEndpoint::parse(&format!("wss://{}", addr)).unwrap();
        let _handle = WsConnector::new().open(&endpoint.target("x"), EventSink::new(session, tx));

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("Timed out waiting for transport event")
            .unwrap();
        assert_eq!(event.session, session);
        assert!(matches!(event.event, TransportEvent::Failed(_)), "{:?}", event.event);
    }

    #[test]
    fn other_errors_are_failures() {
        assert!(!is_remote_close(&tungstenite::Error::Io(
            std::io::Error::from(std::io::ErrorKind::ConnectionRefused)
        )));
        assert!(!is_remote_close(&tungstenite::Error::Protocol(
            ProtocolError::NonZeroReservedBits
        )));
    }
}
