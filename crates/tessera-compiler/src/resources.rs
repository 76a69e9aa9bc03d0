use std::collections::HashSet;

use tessera_workflow::Resource;

/// Return `resources` plus a default server resource if none is present.
///
/// The input is never modified. A list that already holds a server resource
/// comes back unchanged.
pub fn with_server_resource(resources: &[Resource]) -> Vec<Resource> {
  let mut out = resources.to_vec();
  if !out.iter().any(|r| r.is_server()) {
    let taken: HashSet<&str> = resources.iter().map(|r| r.id.as_str()).collect();
    out.push(Resource::server(fresh_id("server", &taken)));
  }
  out
}

/// A `{prefix}-{uuid}` id not present in `taken`.
pub(crate) fn fresh_id(prefix: &str, taken: &HashSet<&str>) -> String {
  loop {
    let id = format!("{}-{}", prefix, uuid::Uuid::new_v4());
    if !taken.contains(id.as_str()) {
      return id;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn server_count(resources: &[Resource]) -> usize {
    resources.iter().filter(|r| r.is_server()).count()
  }

  #[test]
  fn test_adds_exactly_one_server() {
    let resources = vec![Resource {
      id: "web".to_string(),
      kind: "web".to_string(),
      extra: Default::default(),
    }];

    let out = with_server_resource(&resources);
    assert_eq!(server_count(&out), 1);
    assert_eq!(out.len(), 2);
    // input untouched
    assert_eq!(resources.len(), 1);
  }

  #[test]
  fn test_existing_server_is_kept() {
    let resources = vec![Resource::server("srv")];
    let out = with_server_resource(&resources);
    assert_eq!(out, resources);

    let out = with_server_resource(&out);
    assert_eq!(server_count(&out), 1);
  }

  #[test]
  fn test_empty_list_gets_server() {
    let out = with_server_resource(&[]);
    assert_eq!(server_count(&out), 1);
    assert!(out[0].id.starts_with("server-"));
    assert_eq!(out[0].extra["name"], serde_json::json!(out[0].id));
  }
}
