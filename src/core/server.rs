use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ConnectInfo;

use crate::config::ServerConfig;
use crate::core::dispatcher::Dispatcher;
use crate::error::GatewayError;

/// Core API Gateway trait that defines the server lifecycle
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Start the gateway server
    async fn start(&self) -> Result<(), GatewayError>;

    /// Stop the gateway server
    async fn stop(&self) -> Result<(), GatewayError>;

    /// Check if the gateway is healthy
    async fn health_check(&self) -> bool;
}

/// Server state that can be mutated
struct ServerState {
    /// Server handle for graceful shutdown
    server_handle: Option<tokio::task::JoinHandle<()>>,
    /// Shutdown signal sender
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

/// HTTP front-end: terminates inbound requests and hands every one of them
/// to the dispatcher.
pub struct ApiGateway {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    server_state: Arc<tokio::sync::Mutex<ServerState>>,
}

impl ApiGateway {
    pub fn new(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            server_state: Arc::new(tokio::sync::Mutex::new(ServerState {
                server_handle: None,
                shutdown_tx: None,
            })),
        }
    }
}

#[async_trait]
impl Gateway for ApiGateway {
    async fn start(&self) -> Result<(), GatewayError> {
        let mut server_state = self.server_state.lock().await;
        if server_state.server_handle.is_some() {
            return Err(GatewayError::InternalError(
                "Server is already running".to_string(),
            ));
        }

        let dispatcher = self.dispatcher.clone();

        let app = axum::Router::new()
            .route("/health", axum::routing::get(|| async { "OK" }))
            .fallback(
                move |ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
                      req: axum::http::Request<axum::body::Body>| {
                    let dispatcher = dispatcher.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let body_bytes = match hyper::body::to_bytes(body).await {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                tracing::error!("Failed to read request body: {}", e);
                                return axum::http::Response::builder()
                                    .status(400)
                                    .body(axum::body::Body::from("Failed to read request body"))
                                    .unwrap();
                            }
                        };

                        let response = dispatcher
                            .dispatch(parts.method, parts.uri, parts.headers, body_bytes, peer_addr)
                            .await;

                        let mut builder = axum::http::Response::builder().status(response.status);
                        for (name, value) in response.headers.iter() {
                            builder = builder.header(name, value);
                        }
                        builder.body(axum::body::Body::from(response.body)).unwrap()
                    }
                },
            )
            .layer(tower_http::trace::TraceLayer::new_for_http());

        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| GatewayError::InternalError(format!("Invalid address: {}", e)))?;

        tracing::info!("Starting gateway server on {}", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let config = self.config.clone();

        let server_handle = tokio::spawn(async move {
            let server = axum::Server::bind(&addr)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>());

            let graceful = server.with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                tracing::info!("Shutdown signal received, starting graceful shutdown");
            });

            if let Err(e) = graceful.await {
                tracing::error!("Server error: {}", e);
            }

            tracing::info!("Server on {}:{} has been shut down", config.host, config.port);
        });

        server_state.server_handle = Some(server_handle);
        server_state.shutdown_tx = Some(shutdown_tx);

        tracing::info!("Gateway server started successfully");
        Ok(())
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        let mut server_state = self.server_state.lock().await;

        if server_state.server_handle.is_none() {
            return Err(GatewayError::InternalError(
                "Server is not running".to_string(),
            ));
        }

        if let Some(tx) = server_state.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("Shutdown signal sent to server");
        }

        if let Some(handle) = server_state.server_handle.take() {
            handle.await.map_err(|e| {
                GatewayError::InternalError(format!("Error while shutting down server: {}", e))
            })?;
            tracing::info!("Server has been shut down gracefully");
            Ok(())
        } else {
            Err(GatewayError::InternalError(
                "Server handle not found".to_string(),
            ))
        }
    }

    async fn health_check(&self) -> bool {
        self.server_state.lock().await.server_handle.is_some()
    }
}
