//! WebSocket connect + frame pump shared by Dirigera and Home Assistant.
//!
//! The pump reads one frame at a time (the subscription is strictly
//! serialized), hands text frames to a caller-supplied handler, and writes
//! back whatever the handler asks for. It returns on cancellation, on a
//! close frame, or on a read error.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::transport::insecure_rustls_config;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the handler wants done after a text frame.
#[derive(Debug)]
pub enum FrameReply {
    Nothing,
    Send(String),
    Fail(Error),
}

/// Open a WebSocket, optionally accepting self-signed certificates.
pub async fn connect(
    url: &Url,
    headers: &[(&str, String)],
    accept_invalid_certs: bool,
) -> Result<WsStream, Error> {
    tracing::info!(url = %url, "connecting WebSocket");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    for (name, value) in headers {
        request = request.with_header(*name, value.clone());
    }

    let connector = if accept_invalid_certs && url.scheme() == "wss" {
        Some(Connector::Rustls(insecure_rustls_config()?))
    } else {
        None
    };

    let (ws, _response) =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("WebSocket connected");
    Ok(ws)
}

/// Read frames until cancelled or closed.
pub async fn pump<F>(mut ws: WsStream, cancel: &CancellationToken, mut on_text: F) -> Result<(), Error>
where
    F: FnMut(&str) -> FrameReply,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = ws.close(None).await;
                return Ok(());
            }
            frame = ws.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match on_text(text.as_str()) {
                            FrameReply::Nothing => {}
                            FrameReply::Send(reply) => {
                                ws.send(tungstenite::Message::Text(reply.into()))
                                    .await
                                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                            }
                            FrameReply::Fail(err) => {
                                let _ = ws.close(None).await;
                                return Err(err);
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        tracing::trace!("WebSocket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let reason = frame
                            .map(|cf| format!("code {}: {}", cf.code, cf.reason))
                            .unwrap_or_else(|| "no close payload".into());
                        tracing::info!(%reason, "WebSocket close frame received");
                        return Err(Error::StreamClosed { reason });
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        return Err(Error::StreamClosed {
                            reason: "stream ended".into(),
                        });
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
