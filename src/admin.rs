//! Admin HTTP surface for managing the stub catalog at runtime.
//!
//! | Method | Path        | Semantics                                        |
//! |--------|-------------|--------------------------------------------------|
//! | GET    | `/`         | Entire catalog as JSON                           |
//! | POST   | `/add`      | Store one stub or an array of stubs              |
//! | GET    | `/requests` | The request ledger                               |
//! | GET    | `/clear`    | Empty catalog and ledger                         |
//! | POST   | `/find`     | Ad-hoc match, returning the output or a 404      |

use std::sync::Arc;

use axum::Router;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::storage::{StubCatalog, StubStore};
use crate::stub::{FindStubPayload, RequestRecord, Stub, StubOutput};

/// Build the admin router over a shared store.
pub fn router(store: Arc<StubStore>) -> Router {
  Router::new()
    .route("/", get(list_stubs))
    .route("/add", post(add_stub))
    .route("/requests", get(list_requests))
    .route("/clear", get(clear))
    .route("/find", post(find_stub))
    .layer(TraceLayer::new_for_http())
    .with_state(store)
}

/// Serve the admin API on an already bound listener until the process exits.
pub async fn serve(store: Arc<StubStore>, listener: TcpListener) -> anyhow::Result<()> {
  axum::serve(listener, router(store)).await?;
  Ok(())
}

async fn list_stubs(State(store): State<Arc<StubStore>>) -> Json<StubCatalog> {
  Json(store.all())
}

/// The body may be a single stub or an array of stubs, the same discipline as
/// the file loader.
async fn add_stub(
  State(store): State<Arc<StubStore>>,
  Json(body): Json<Value>,
) -> Result<&'static str, (StatusCode, String)> {
  if let Ok(stubs) = serde_json::from_value::<Vec<Stub>>(body.clone()) {
    if !stubs.is_empty() {
      debug!("Adding {} stubs", stubs.len());
      for stub in stubs {
        store.store(stub);
      }
      return Ok("Success add stub");
    }
  }

  match serde_json::from_value::<Stub>(body) {
    Ok(stub) => {
      store.store(stub);
      Ok("Success add stub")
    }
    Err(err) => Err((StatusCode::BAD_REQUEST, err.to_string())),
  }
}

async fn list_requests(State(store): State<Arc<StubStore>>) -> Json<Vec<RequestRecord>> {
  Json(store.all_requests())
}

async fn clear(State(store): State<Arc<StubStore>>) -> &'static str {
  store.clear();
  "OK"
}

async fn find_stub(
  State(store): State<Arc<StubStore>>,
  Json(body): Json<Value>,
) -> Result<Json<StubOutput>, (StatusCode, String)> {
  let payload: FindStubPayload =
    serde_json::from_value(body).map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
  match store.find(&payload) {
    Ok(output) => Ok(Json(output)),
    Err(err) => Err((StatusCode::NOT_FOUND, err.to_string())),
  }
}
