//! Dynamic gRPC dispatcher.
//!
//! Builds one route per unary method found in a compiled file descriptor set
//! and serves them over HTTP/2, delegating every call to the stub resolver.
//! The `grpc.reflection.v1` and `v1alpha` services are registered from the
//! same descriptor set.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::anyhow;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};
use prost_types::FileDescriptorSet;
use tokio::net::TcpListener;
use tonic::body::Body;
use tonic::server::{Grpc, UnaryService};
use tonic::{Request, Response, Status};
use tonic_reflection::server::Builder as ReflectionBuilder;
use tower::Service;
use tower::util::BoxCloneService;
use tracing::{debug, trace, warn};

use crate::codec::DynamicCodec;
use crate::mock_service;
use crate::storage::StubStore;

type GrpcService = BoxCloneService<http::Request<Body>, http::Response<Body>, Infallible>;

/// One servable unary method.
#[derive(Debug, Clone)]
struct MethodRoute {
  service: String,
  method: String,
  input: MessageDescriptor,
  output: MessageDescriptor,
}

/// gRPC mock server: routes calls by request path to the matching engine.
#[derive(Clone)]
pub struct GrpcMockServer {
  store: Arc<StubStore>,
  routes: Arc<HashMap<String, MethodRoute>>,
  reflection_v1: GrpcService,
  reflection_v1alpha: GrpcService,
}

impl std::fmt::Debug for GrpcMockServer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GrpcMockServer")
      .field("store", &self.store)
      .field("routes", &self.routes)
      .finish()
  }
}

impl GrpcMockServer {
  /// Build the route table from a file descriptor set and register the
  /// reflection services for it. Streaming methods are skipped with a
  /// warning; a set with no unary method at all is a startup error.
  pub fn new(store: Arc<StubStore>, descriptors: FileDescriptorSet) -> anyhow::Result<Self> {
    let pool = DescriptorPool::from_file_descriptor_set(descriptors.clone())
      .map_err(|err| anyhow!("invalid descriptor set: {err}"))?;

    let mut routes = HashMap::new();
    for service in pool.services() {
      for method in service.methods() {
        if method.is_client_streaming() || method.is_server_streaming() {
          warn!("Skipping streaming method {}/{}", service.full_name(), method.name());
          continue;
        }
        let path = format!("/{}/{}", service.full_name(), method.name());
        debug!("Routing {}", path);
        routes.insert(path, MethodRoute {
          service: service.full_name().to_string(),
          method: method.name().to_string(),
          input: method.input(),
          output: method.output(),
        });
      }
    }
    if routes.is_empty() {
      return Err(anyhow!("descriptor set does not contain any unary methods"));
    }

    let reflection_v1 = ReflectionBuilder::configure()
      .register_file_descriptor_set(descriptors.clone())
      .build_v1()?;
    let reflection_v1alpha = ReflectionBuilder::configure()
      .register_file_descriptor_set(descriptors)
      .build_v1alpha()?;

    Ok(GrpcMockServer {
      store,
      routes: Arc::new(routes),
      reflection_v1: BoxCloneService::new(reflection_v1),
      reflection_v1alpha: BoxCloneService::new(reflection_v1alpha),
    })
  }

  /// Accept connections on an already bound listener until the process
  /// exits. Each connection is served on its own task.
  pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
    loop {
      let (stream, remote) = listener.accept().await?;
      trace!("Accepted gRPC connection from {}", remote);
      let service = TowerToHyperService::new(self.clone());
      tokio::spawn(async move {
        if let Err(err) = auto::Builder::new(TokioExecutor::new())
          .serve_connection(TokioIo::new(stream), service)
          .await
        {
          debug!("Connection from {} ended: {}", remote, err);
        }
      });
    }
  }
}

impl Service<http::Request<Incoming>> for GrpcMockServer {
  type Response = http::Response<Body>;
  type Error = Infallible;
  type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

  fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
    Poll::Ready(Ok(()))
  }

  fn call(&mut self, req: http::Request<Incoming>) -> Self::Future {
    let path = req.uri().path();

    if path.starts_with("/grpc.reflection.v1.ServerReflection/") {
      let mut service = self.reflection_v1.clone();
      return Box::pin(async move { service.call(req.map(Body::new)).await });
    }
    if path.starts_with("/grpc.reflection.v1alpha.ServerReflection/") {
      let mut service = self.reflection_v1alpha.clone();
      return Box::pin(async move { service.call(req.map(Body::new)).await });
    }

    match self.routes.get(path) {
      Some(route) => {
        let route = route.clone();
        let store = self.store.clone();
        Box::pin(async move {
          let codec = DynamicCodec::new(route.input.clone());
          let mut grpc = Grpc::new(codec);
          Ok(grpc.unary(MockUnaryHandler { store, route }, req).await)
        })
      }
      None => {
        debug!("No route for {}", path);
        Box::pin(async move { Ok(unimplemented_response()) })
      }
    }
  }
}

/// Per-call handler bridging tonic's unary machinery to the stub resolver.
struct MockUnaryHandler {
  store: Arc<StubStore>,
  route: MethodRoute,
}

impl UnaryService<DynamicMessage> for MockUnaryHandler {
  type Response = DynamicMessage;
  type Future = Pin<Box<dyn Future<Output = Result<Response<DynamicMessage>, Status>> + Send>>;

  fn call(&mut self, request: Request<DynamicMessage>) -> Self::Future {
    let store = self.store.clone();
    let route = self.route.clone();
    Box::pin(async move {
      let (metadata, _, message) = request.into_parts();
      mock_service::handle_call(
        &store,
        &route.service,
        &route.method,
        &metadata,
        &message,
        route.output,
      )
      .await
    })
  }
}

/// `Unimplemented` response for paths outside the descriptor set, in the
/// shape tonic's generated servers produce for unknown methods.
fn unimplemented_response() -> http::Response<Body> {
  let mut response = http::Response::new(Body::default());
  response
    .headers_mut()
    .insert("grpc-status", http::HeaderValue::from_static("12"));
  response
    .headers_mut()
    .insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("application/grpc"));
  response
}
