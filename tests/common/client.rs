//! Test WebSocket client.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// A connected WebSocket client.
pub struct TestSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    protocol: Option<String>,
}

impl TestSocket {
    /// Open `ws://{addr}{path}`, optionally offering a sub-protocol.
    pub async fn connect(
        addr: SocketAddr,
        path: &str,
        protocol: Option<&str>,
    ) -> anyhow::Result<Self> {
        let mut request = format!("ws://{addr}{path}").into_client_request()?;
        if let Some(protocol) = protocol {
            request
                .headers_mut()
                .insert("sec-websocket-protocol", HeaderValue::from_str(protocol)?);
        }

        let (stream, response) = timeout(Duration::from_secs(5), connect_async(request)).await??;
        let protocol = response
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(Self { stream, protocol })
    }

    /// The sub-protocol the server agreed to.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub async fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.stream.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Next text frame, skipping control frames.
    pub async fn recv_text(&mut self) -> anyhow::Result<String> {
        self.recv_text_timeout(Duration::from_secs(5)).await
    }

    pub async fn recv_text_timeout(&mut self, dur: Duration) -> anyhow::Result<String> {
        loop {
            let frame = timeout(dur, self.stream.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
            match frame {
                Message::Text(text) => return Ok(text),
                Message::Close(frame) => anyhow::bail!("closed by server: {frame:?}"),
                _ => continue,
            }
        }
    }

    pub async fn close(mut self) -> anyhow::Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}
