use crate::agent::ChatAgent;
use crate::cli::Args;
use crate::models::websocket::{ClientMessage, ServerMessage};
use crate::session::ConversationState;

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::io::{AsyncRead, AsyncWrite};

use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_rustls::TlsAcceptor;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, pkcs8_private_keys};

use governor::{DefaultDirectRateLimiter, RateLimiter, Quota};

use log::{info, warn, error, debug};
use futures::{SinkExt, StreamExt};

const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

pub(crate) fn load_tls_config(
    cert_path: &str,
    key_path: &str
) -> Result<Arc<ServerConfig>, Box<dyn Error + Send + Sync>> {
    let cert_file = File::open(cert_path).map_err(|e|
        format!("Failed to open TLS certificate file '{}': {}", cert_path, e)
    )?;
    let key_file = File::open(key_path).map_err(|e|
        format!("Failed to open TLS key file '{}': {}", key_path, e)
    )?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Failed to read certificate(s): {}", e))?;

    let mut keys = pkcs8_private_keys(&mut key_reader);
    let key = match keys.next() {
        Some(Ok(k)) => PrivateKeyDer::Pkcs8(k),
        Some(Err(e)) => {
            return Err(format!("Error reading private key: {}", e).into());
        }
        None => {
            return Err("No PKCS8 private key found in key file".into());
        }
    };

    let config = ServerConfig::builder().with_no_client_auth().with_single_cert(cert_chain, key)?;
    Ok(Arc::new(config))
}

/// Global limit on accepted connections. Zero is treated as one per second.
fn connection_limiter(per_second: u32) -> DefaultDirectRateLimiter {
    let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(per_second))
}

pub async fn start_ws_server(
    addr: &str,
    agent: Arc<ChatAgent>,
    args: Args,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    let protocol = if args.tls_enabled() { "wss" } else { "ws" };
    info!("{} server listening on: {}", protocol.to_uppercase(), addr);

    let tls_acceptor = if args.enable_tls {
        match (&args.tls_cert_path, &args.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                info!(
                    "TLS enabled. Loading certificate from '{}' and key from '{}'",
                    cert_path,
                    key_path
                );
                let config = load_tls_config(cert_path, key_path)?;
                Some(TlsAcceptor::from(config))
            }
            (Some(_), None) | (None, Some(_)) => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                return Err("Missing TLS certificate or key path".into());
            }
            (None, None) => {
                error!("--enable-tls was set but no certificate/key paths provided.");
                return Err("TLS enabled without cert/key".into());
            }
        }
    } else {
        info!("TLS not enabled. Running plain WebSocket (WS) server.");
        None
    };

    let limiter = connection_limiter(args.ws_connections_per_second);

    loop {
        let (stream, peer) = listener.accept().await?;

        if limiter.check().is_err() {
            warn!("Connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let agent_clone = Arc::clone(&agent);
        let tls_acceptor_clone = tls_acceptor.clone();

        tokio::spawn(async move {
            let process_result = if let Some(acceptor) = tls_acceptor_clone {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        info!("TLS handshake successful for {}", peer);
                        process_connection(peer, tls_stream, agent_clone).await
                    }
                    Err(e) => {
                        error!("TLS handshake error for {}: {}", peer, e);
                        Err(Box::new(e) as Box<dyn Error + Send + Sync>)
                    }
                }
            } else {
                process_connection(peer, stream, agent_clone).await
            };

            if let Err(e) = process_result {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    agent: Arc<ChatAgent>,
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    match accept_async(stream).await {
        Ok(ws) => {
            handle_connection(peer, ws, agent).await;
            Ok(())
        }
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            Err(Box::new(e) as _)
        }
    }
}

/// Runs one browser session. The conversation lives as long as the
/// connection, and each frame is answered before the next one is read.
pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    agent: Arc<ChatAgent>
)
    where S: AsyncRead + AsyncWrite + Unpin
{
    info!("New WebSocket session: {}", peer);

    let (mut tx, mut rx) = websocket.split();
    let mut state = ConversationState::new();

    while let Some(msg) = rx.next().await {
        let message = match msg {
            Ok(message) => message,
            Err(e) => {
                warn!("WebSocket error from {}: {}", peer, e);
                break;
            }
        };

        if message.len() > MAX_MESSAGE_SIZE {
            warn!(
                "Message from {} exceeds size limit ({} > {})",
                peer,
                message.len(),
                MAX_MESSAGE_SIZE
            );
            let error_msg = ServerMessage::Error {
                message: "Message too large".to_string(),
                message_count: state.len(),
            };
            if send_frame(&mut tx, &error_msg).await.is_err() {
                error!("Failed to send size limit error to {}", peer);
            }
            break;
        }

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                info!("Client {} closed the session", peer);
                break;
            }
            other => {
                debug!("Ignoring non-text frame from {}: {:?}", peer, other);
                continue;
            }
        };

        let replies = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(client_msg) => {
                if client_msg.submits_query() {
                    if let Err(e) = send_frame(&mut tx, &ServerMessage::Processing).await {
                        error!("Error sending processing status to {}: {}", peer, e);
                        break;
                    }
                }
                agent.handle(&mut state, client_msg).await
            }
            Err(e) => {
                warn!("Malformed frame from {}: {}", peer, e);
                vec![ServerMessage::Error {
                    message: "Invalid message format".to_string(),
                    message_count: state.len(),
                }]
            }
        };

        let mut send_failed = false;
        for reply in &replies {
            if let Err(e) = send_frame(&mut tx, reply).await {
                error!("Error sending reply to {}: {}", peer, e);
                send_failed = true;
                break;
            }
        }
        if send_failed {
            break;
        }
    }

    info!("WebSocket session {} ended with {} messages", peer, state.len());
}

async fn send_frame<T>(tx: &mut T, msg: &ServerMessage) -> Result<(), Box<dyn Error + Send + Sync>>
    where T: futures::Sink<Message> + Unpin, T::Error: Error + Send + Sync + 'static
{
    let json = serde_json::to_string(msg)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatError;
    use crate::testing::{ ScriptedClient, reply };
    use tokio::io::DuplexStream;
    use tokio_tungstenite::client_async;

    async fn recv(
        client: &mut WebSocketStream<DuplexStream>
    ) -> ServerMessage {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).unwrap();
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended early: {:?}", other),
            }
        }
    }

    async fn send(
        client: &mut WebSocketStream<DuplexStream>,
        json: &str
    ) {
        client.send(Message::Text(json.to_string())).await.unwrap();
    }

    #[tokio::test]
    async fn session_over_websocket() {
        let scripted = Arc::new(
            ScriptedClient::new(vec![Ok(reply("Gut, danke!", "c1")), Err(ChatError::Transport("timeout".into()))])
        );
        let agent = Arc::new(ChatAgent::new(scripted.clone()));
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let server = tokio::spawn(async move {
            let ws = accept_async(server_io).await.unwrap();
            handle_connection(peer, ws, agent).await;
        });

        let (mut client, _) = client_async("ws://localhost/", client_io).await.unwrap();

        send(&mut client, r#"{"type":"chat","content":"Wie geht's?"}"#).await;
        assert_eq!(recv(&mut client).await, ServerMessage::Processing);
        match recv(&mut client).await {
            ServerMessage::Response { content, message_count, .. } => {
                assert_eq!(content, "Gut, danke!");
                assert_eq!(message_count, 2);
            }
            other => panic!("expected response, got {:?}", other),
        }

        send(&mut client, r#"{"type":"chat","content":"   "}"#).await;
        send(&mut client, r#"{"type":"chat","content":"Und dir?"}"#).await;
        assert_eq!(recv(&mut client).await, ServerMessage::Processing);
        assert_eq!(recv(&mut client).await, ServerMessage::Error {
            message: "API request failed: timeout".into(),
            message_count: 3,
        });

        send(&mut client, "not json").await;
        assert!(matches!(recv(&mut client).await, ServerMessage::Error { message_count: 3, .. }));

        send(&mut client, r#"{"type":"clear"}"#).await;
        assert_eq!(recv(&mut client).await, ServerMessage::Cleared);

        send(&mut client, r#"{"type":"history"}"#).await;
        assert_eq!(recv(&mut client).await, ServerMessage::Transcript {
            messages: Vec::new(),
            message_count: 0,
        });

        let _ = client.close(None).await;
        server.await.unwrap();

        assert_eq!(
            scripted.calls(),
            vec![("Wie geht's?".to_string(), None), ("Und dir?".to_string(), Some("c1".to_string()))]
        );
    }

    #[tokio::test]
    async fn oversized_frame_ends_the_session() {
        let scripted = Arc::new(ScriptedClient::new(vec![]));
        let agent = Arc::new(ChatAgent::new(scripted.clone()));
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let server = tokio::spawn(async move {
            let ws = accept_async(server_io).await.unwrap();
            handle_connection(peer, ws, agent).await;
        });

        let (mut client, _) = client_async("ws://localhost/", client_io).await.unwrap();

        let padding = "a".repeat(MAX_MESSAGE_SIZE + 10);
        let frame = format!(r#"{{"type":"chat","content":"{}"}}"#, padding);
        send(&mut client, &frame).await;

        assert_eq!(recv(&mut client).await, ServerMessage::Error {
            message: "Message too large".into(),
            message_count: 0,
        });
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => panic!("unexpected frame after size error: {}", text),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => break,
            }
        }

        server.await.unwrap();
        assert!(scripted.calls().is_empty());
    }

    #[test]
    fn connection_limiter_rejects_burst_over_quota() {
        let limiter = connection_limiter(1);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());

        let limiter = connection_limiter(0);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());

        let limiter = connection_limiter(3);
        for _ in 0..3 {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }
}
