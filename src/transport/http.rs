//! HTTP transport: bincode-encoded requests posted to `/paxos`.
use super::{Receiver, Transport};
use crate::error::TransportError;
use crate::messages::{Request, Response};
use futures_util::future::BoxFuture;
use hyper::{
    client::HttpConnector,
    service::{make_service_fn, service_fn},
    Body, Client, Method, Server, StatusCode,
};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tokio::{sync::oneshot, task::JoinHandle};

const PAXOS_PATH: &str = "/paxos";

/// Client side of the HTTP transport. Connections are pooled by hyper.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Body>,
}

impl Default for HttpTransport {
    fn default() -> HttpTransport {
        HttpTransport {
            client: Client::new(),
        }
    }
}

impl HttpTransport {
    async fn call(
        client: Client<HttpConnector, Body>,
        target: SocketAddr,
        request: Request,
    ) -> Result<Response, TransportError> {
        let body = bincode::serialize(&request)?;
        let request = hyper::Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}{}", target, PAXOS_PATH))
            .body(Body::from(body))?;

        let response = client.request(request).await?;
        if response.status() != StatusCode::OK {
            return Err(TransportError::Status(response.status()));
        }
        let bytes = hyper::body::to_bytes(response.into_body()).await?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

impl Transport for HttpTransport {
    fn invoke(
        &self,
        target: SocketAddr,
        request: Request,
    ) -> BoxFuture<'static, Result<Response, TransportError>> {
        Box::pin(HttpTransport::call(self.client.clone(), target, request))
    }
}

/// A running HTTP server for one role.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), hyper::Error>>,
}

impl ServerHandle {
    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting requests and waits for in-flight ones to finish.
    pub async fn shutdown(mut self) -> Result<(), TransportError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(res) => res.map_err(TransportError::from),
            Err(e) => {
                error!("Server task failed: {}", e);
                Ok(())
            }
        }
    }

    /// Runs until the server fails.
    pub async fn wait(self) -> Result<(), TransportError> {
        let ServerHandle { task, shutdown, .. } = self;
        // keep the shutdown sender alive for as long as the server runs
        let _shutdown = shutdown;
        match task.await {
            Ok(res) => res.map_err(TransportError::from),
            Err(e) => {
                error!("Server task failed: {}", e);
                Ok(())
            }
        }
    }
}

/// Serves `receiver` over HTTP on an already bound listener. Must be called
/// from within a tokio runtime.
pub fn serve(
    listener: TcpListener,
    receiver: Arc<dyn Receiver>,
) -> Result<ServerHandle, TransportError> {
    listener.set_nonblocking(true)?;

    let service = make_service_fn(move |_| {
        let receiver = receiver.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let receiver = receiver.clone();
                async move { handle(receiver, req).await }
            }))
        }
    });

    let server = Server::from_tcp(listener)?.serve(service);
    let local_addr = server.local_addr();
    let (tx, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(server.with_graceful_shutdown(async move {
        let _ = rx.await;
    }));

    info!("Serving paxos requests on {}", local_addr);
    Ok(ServerHandle {
        local_addr,
        shutdown: Some(tx),
        task,
    })
}

async fn handle(
    receiver: Arc<dyn Receiver>,
    req: hyper::Request<Body>,
) -> Result<hyper::Response<Body>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, PAXOS_PATH) => {}
        (_, PAXOS_PATH) => return respond(StatusCode::METHOD_NOT_ALLOWED),
        _ => return respond(StatusCode::NOT_FOUND),
    }

    let body = hyper::body::to_bytes(req.into_body()).await?;
    let request: Request = match bincode::deserialize(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Error deserializing request: {:?}", e);
            return respond(StatusCode::BAD_REQUEST);
        }
    };

    let method = request.method();
    let response = match receiver.receive(request).await {
        Some(response) => response,
        None => {
            debug!("Request {} not served here", method);
            return respond(StatusCode::NOT_FOUND);
        }
    };

    match bincode::serialize(&response) {
        Ok(bytes) => Ok(hyper::Response::new(Body::from(bytes))),
        Err(e) => {
            error!("Error serializing response: {:?}", e);
            respond(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn respond(code: StatusCode) -> Result<hyper::Response<Body>, hyper::Error> {
    let mut resp = hyper::Response::default();
    *resp.status_mut() = code;
    Ok(resp)
}
