//! Integration tests for the admin HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use expectest::prelude::*;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use grpcmock::admin;
use grpcmock::storage::StubStore;

async fn start_admin() -> (SocketAddr, Arc<StubStore>) {
  let store = Arc::new(StubStore::new());
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let router = admin::router(store.clone());
  tokio::spawn(async move {
    axum::serve(listener, router).await.unwrap();
  });
  (addr, store)
}

fn greeter_stub(name: &str, message: &str) -> Value {
  json!({
    "service": "Greeter",
    "method": "SayHello",
    "input": { "equals": { "name": name } },
    "output": { "data": { "message": message } }
  })
}

#[test_log::test(tokio::test)]
async fn add_then_list_returns_the_catalog() {
  let (addr, _store) = start_admin().await;
  let client = reqwest::Client::new();

  let response = client
    .post(format!("http://{addr}/add"))
    .json(&greeter_stub("Alice", "hi Alice"))
    .send()
    .await
    .unwrap();
  expect!(response.status().as_u16()).to(be_equal_to(200));
  expect!(response.text().await.unwrap()).to(be_equal_to("Success add stub"));

  let catalog: Value = client
    .get(format!("http://{addr}/"))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  let bucket = &catalog["Greeter"]["SayHello"];
  expect!(bucket.as_array().unwrap().len()).to(be_equal_to(1));
  expect!(bucket[0]["Input"]["equals"]["name"].as_str().unwrap()).to(be_equal_to("Alice"));
  expect!(bucket[0]["Output"]["data"]["message"].as_str().unwrap()).to(be_equal_to("hi Alice"));
}

#[test_log::test(tokio::test)]
async fn add_accepts_an_array_of_stubs() {
  let (addr, store) = start_admin().await;
  let client = reqwest::Client::new();

  let response = client
    .post(format!("http://{addr}/add"))
    .json(&json!([greeter_stub("Alice", "hi"), greeter_stub("Bob", "yo")]))
    .send()
    .await
    .unwrap();
  expect!(response.status().as_u16()).to(be_equal_to(200));
  expect!(store.all()["Greeter"]["SayHello"].len()).to(be_equal_to(2));
}

#[test_log::test(tokio::test)]
async fn malformed_add_bodies_are_rejected() {
  let (addr, _store) = start_admin().await;
  let client = reqwest::Client::new();

  let response = client
    .post(format!("http://{addr}/add"))
    .json(&json!({ "not": "a stub" }))
    .send()
    .await
    .unwrap();
  expect!(response.status().as_u16()).to(be_equal_to(400));
}

#[test_log::test(tokio::test)]
async fn find_returns_the_output_and_records_the_query() {
  let (addr, _store) = start_admin().await;
  let client = reqwest::Client::new();

  client
    .post(format!("http://{addr}/add"))
    .json(&greeter_stub("Alice", "hi Alice"))
    .send()
    .await
    .unwrap();

  let output: Value = client
    .post(format!("http://{addr}/find"))
    .json(&json!({
      "service": "Greeter",
      "method": "SayHello",
      "data": { "name": "Alice" }
    }))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  expect!(output["data"]["message"].as_str().unwrap()).to(be_equal_to("hi Alice"));

  let requests: Value = client
    .get(format!("http://{addr}/requests"))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  let records = requests.as_array().unwrap();
  expect!(records.len()).to(be_equal_to(1));
  expect!(records[0]["count"].as_u64().unwrap()).to(be_equal_to(1));
  expect!(records[0]["record"]["data"]["name"].as_str().unwrap()).to(be_equal_to("Alice"));
}

#[test_log::test(tokio::test)]
async fn find_miss_is_a_404_with_the_diagnostic() {
  let (addr, _store) = start_admin().await;
  let client = reqwest::Client::new();

  client
    .post(format!("http://{addr}/add"))
    .json(&greeter_stub("Alice", "hi Alice"))
    .send()
    .await
    .unwrap();

  let response = client
    .post(format!("http://{addr}/find"))
    .json(&json!({
      "service": "Greeter",
      "method": "SayHello",
      "data": { "name": "Bob" }
    }))
    .send()
    .await
    .unwrap();
  expect!(response.status().as_u16()).to(be_equal_to(404));
  let body = response.text().await.unwrap();
  expect!(body.contains("Can't find stub")).to(be_true());
  expect!(body.contains("Closest Match")).to(be_true());

  let response = client
    .post(format!("http://{addr}/find"))
    .json(&json!({
      "service": "Nope",
      "method": "SayHello",
      "data": {}
    }))
    .send()
    .await
    .unwrap();
  expect!(response.status().as_u16()).to(be_equal_to(404));
  expect!(response.text().await.unwrap()).to(be_equal_to("can't find stub for Service: Nope"));
}

#[test_log::test(tokio::test)]
async fn clear_empties_catalog_and_ledger() {
  let (addr, store) = start_admin().await;
  let client = reqwest::Client::new();

  client
    .post(format!("http://{addr}/add"))
    .json(&greeter_stub("Alice", "hi"))
    .send()
    .await
    .unwrap();
  client
    .post(format!("http://{addr}/find"))
    .json(&json!({ "service": "Greeter", "method": "SayHello", "data": {} }))
    .send()
    .await
    .unwrap();

  let response = client.get(format!("http://{addr}/clear")).send().await.unwrap();
  expect!(response.text().await.unwrap()).to(be_equal_to("OK"));

  expect!(store.all().is_empty()).to(be_true());
  expect!(store.all_requests().is_empty()).to(be_true());
}
