//! Mock gRPC server driven by a declarative catalog of stub files.
//!
//! Two listeners are started: the mock gRPC server itself (every unary method
//! of the configured descriptor set) and an HTTP admin API for inspecting and
//! mutating the stub catalog at runtime. Stub files are loaded from the stub
//! directory before either listener accepts traffic.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Arg, Command, crate_version};
use prost::Message;
use prost_types::FileDescriptorSet;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use grpcmock::loader;
use grpcmock::mock_server::GrpcMockServer;
use grpcmock::storage::StubStore;
use grpcmock::{admin, signals};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let matches = Command::new("grpcmock")
    .version(crate_version!())
    .about("Mock gRPC server driven by declarative stub files")
    .arg(
      Arg::new("grpc-listen")
        .long("grpc-listen")
        .env("GRPC_LISTEN")
        .default_value("0.0.0.0")
        .help("Address the gRPC server will bind to"),
    )
    .arg(
      Arg::new("grpc-port")
        .long("grpc-port")
        .env("GRPC_PORT")
        .value_parser(clap::value_parser!(u16))
        .default_value("4770")
        .help("Port of the gRPC server"),
    )
    .arg(
      Arg::new("admin-listen")
        .long("admin-listen")
        .env("ADMIN_LISTEN")
        .default_value("0.0.0.0")
        .help("Address the admin server will bind to"),
    )
    .arg(
      Arg::new("admin-port")
        .long("admin-port")
        .env("ADMIN_PORT")
        .value_parser(clap::value_parser!(u16))
        .default_value("4771")
        .help("Port of the stub admin server"),
    )
    .arg(
      Arg::new("stubs")
        .long("stubs")
        .env("STUB_PATH")
        .value_parser(clap::value_parser!(PathBuf))
        .default_value("/stubs")
        .help("Directory holding the stub files"),
    )
    .arg(
      Arg::new("descriptors")
        .long("descriptors")
        .env("DESCRIPTOR_SET")
        .value_parser(clap::value_parser!(PathBuf))
        .required(true)
        .help("Compiled file descriptor set with the services to mock"),
    )
    .get_matches();

  let store = Arc::new(StubStore::new());

  let stub_path: &PathBuf = matches.get_one("stubs").unwrap();
  let loaded = loader::load_stubs(&store, stub_path);
  info!("Loaded {} stubs from {}", loaded, stub_path.display());

  let descriptor_path: &PathBuf = matches.get_one("descriptors").unwrap();
  let descriptor_bytes = std::fs::read(descriptor_path)
    .with_context(|| format!("failed to read descriptor set {}", descriptor_path.display()))?;
  let descriptors = FileDescriptorSet::decode(descriptor_bytes.as_slice())
    .with_context(|| format!("failed to decode descriptor set {}", descriptor_path.display()))?;
  let server = GrpcMockServer::new(store.clone(), descriptors)?;

  let admin_addr = listen_addr(&matches, "admin-listen", "admin-port")?;
  let admin_listener = TcpListener::bind(admin_addr)
    .await
    .with_context(|| format!("failed to bind admin server to {admin_addr}"))?;
  println!("Serving stub admin on http://{}", admin_listener.local_addr()?);

  let grpc_addr = listen_addr(&matches, "grpc-listen", "grpc-port")?;
  let grpc_listener = TcpListener::bind(grpc_addr)
    .await
    .with_context(|| format!("failed to bind gRPC server to {grpc_addr}"))?;
  println!("Serving gRPC on tcp://{}", grpc_listener.local_addr()?);

  let admin = tokio::spawn(admin::serve(store, admin_listener));
  let grpc = tokio::spawn(server.serve(grpc_listener));

  tokio::select! {
    result = admin => result?.context("admin server failed")?,
    result = grpc => result?.context("gRPC server failed")?,
    _ = signals::shutdown() => info!("Stopping gRPC mock server"),
  }
  Ok(())
}

fn listen_addr(
  matches: &clap::ArgMatches,
  listen: &str,
  port: &str,
) -> anyhow::Result<SocketAddr> {
  let address: &String = matches.get_one(listen).unwrap();
  let port: u16 = *matches.get_one(port).unwrap();
  format!("{address}:{port}")
    .parse()
    .with_context(|| format!("invalid listen address {address}:{port}"))
}
