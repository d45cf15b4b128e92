//! Loads stub files from a directory tree into the store.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::storage::StubStore;
use crate::stub::Stub;

/// Recursively walk `dir` and store every stub found in `.json` files (the
/// extension check is case-insensitive). A file may hold a single stub object
/// or an array of stubs; files that fail to parse are logged and skipped.
/// Returns the number of stubs stored.
pub fn load_stubs(store: &StubStore, dir: &Path) -> usize {
  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(err) => {
      warn!("Can't read stubs from {}: {}", dir.display(), err);
      return 0;
    }
  };

  let mut count = 0;
  for entry in entries.flatten() {
    let path = entry.path();
    if path.is_dir() {
      count += load_stubs(store, &path);
      continue;
    }
    let is_stub_file = path
      .file_name()
      .and_then(|name| name.to_str())
      .is_some_and(|name| name.to_lowercase().ends_with(".json"));
    if is_stub_file {
      count += load_stub_file(store, &path);
    }
  }
  count
}

fn load_stub_file(store: &StubStore, path: &Path) -> usize {
  let contents = match fs::read_to_string(path) {
    Ok(contents) => contents,
    Err(err) => {
      warn!("Error reading file {}: {}, skipping", path.display(), err);
      return 0;
    }
  };

  // a file holds either an array of stubs or a single stub; try the array
  // form first
  if let Ok(stubs) = serde_json::from_str::<Vec<Stub>>(&contents) {
    if !stubs.is_empty() {
      debug!("Unmarshalled {} as an array of {} stubs", path.display(), stubs.len());
      let count = stubs.len();
      for stub in stubs {
        store.store(stub);
      }
      return count;
    }
  }

  match serde_json::from_str::<Stub>(&contents) {
    Ok(stub) => {
      store.store(stub);
      1
    }
    Err(err) => {
      warn!("Error unmarshalling file {}: {}, skipping", path.display(), err);
      0
    }
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use expectest::prelude::*;
  use serde_json::json;

  use super::*;

  fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).unwrap();
  }

  fn single_stub() -> String {
    json!({
      "service": "Greeter",
      "method": "SayHello",
      "input": { "equals": { "name": "Alice" } },
      "output": { "data": { "message": "hi" } }
    })
    .to_string()
  }

  #[test]
  fn loads_single_and_array_stub_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "single.json", &single_stub());
    write(
      dir.path(),
      "many.json",
      &json!([
        {
          "service": "Greeter",
          "method": "SayHello",
          "input": { "equals": { "name": "Bob" } },
          "output": { "data": {} }
        },
        {
          "service": "Greeter",
          "method": "SayGoodbye",
          "input": { "contains": {} },
          "output": { "data": {} }
        }
      ])
      .to_string(),
    );

    let store = StubStore::new();
    expect!(load_stubs(&store, dir.path())).to(be_equal_to(3));
    expect!(store.all()["Greeter"].len()).to(be_equal_to(2));
  }

  #[test]
  fn walks_nested_directories() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    fs::create_dir_all(&nested).unwrap();
    write(&nested, "stub.json", &single_stub());

    let store = StubStore::new();
    expect!(load_stubs(&store, dir.path())).to(be_equal_to(1));
  }

  #[test]
  fn skips_non_json_and_malformed_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "notes.txt", "not a stub");
    write(dir.path(), "broken.json", "{ nope");
    write(dir.path(), "empty-array.json", "[]");
    write(dir.path(), "ok.JSON", &single_stub());

    let store = StubStore::new();
    expect!(load_stubs(&store, dir.path())).to(be_equal_to(1));
  }

  #[test]
  fn missing_directory_loads_nothing() {
    let store = StubStore::new();
    expect!(load_stubs(&store, Path::new("/does/not/exist"))).to(be_equal_to(0));
  }
}
