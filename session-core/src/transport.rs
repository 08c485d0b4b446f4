//! Thin wrapper around the `tokio-tungstenite` connect call.
//!
//! Kept separate from [`crate::engine`] so the event loop's control flow
//! isn't cluttered with TLS/handshake details, mirroring how the teacher
//! crate isolates its raw connect call from session bookkeeping.

use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;

use crate::Error;

/// The concrete stream type the engine drives. TLS is negotiated
/// automatically for `wss://` URLs via the `rustls-tls-webpki-roots`
/// feature on `tokio-tungstenite`.
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects to `url`, performing the WebSocket upgrade handshake.
pub(crate) async fn connect(url: &str) -> Result<WsStream, Error> {
    let (stream, response) = tokio_tungstenite::connect_async(url).await?;
    tracing::debug!(status = %response.status(), "websocket handshake complete");
    Ok(stream)
}
