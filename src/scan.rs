//! Resource scanning
//!
//! Reads multi-document YAML and reports what it declares: the object kinds
//! (used by uninstall to know what to delete) and the container images (used
//! by relocation to know what to copy).

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_yaml::Value;

use crate::Error;

/// Parse every non-empty document of a multi-document YAML payload
fn documents(content: &str) -> Result<Vec<Value>, Error> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(doc)
            .map_err(|e| Error::serialization(format!("error parsing content: {}", e)))?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Distinct kinds declared by the documents, sorted for deterministic output
pub fn list_kinds(content: &str) -> Result<Vec<String>, Error> {
    let kinds: BTreeSet<String> = documents(content)?
        .iter()
        .filter_map(|doc| doc.get("kind").and_then(Value::as_str))
        .filter(|kind| !kind.is_empty())
        .map(str::to_string)
        .collect();
    Ok(kinds.into_iter().collect())
}

/// Image references declared anywhere in the documents, in document order.
///
/// Every string value under an `image` key counts, at any depth. Duplicates
/// are kept.
pub fn list_images(content: &str) -> Result<Vec<String>, Error> {
    let mut images = Vec::new();
    for doc in documents(content)? {
        collect_images(&doc, &mut images);
    }
    Ok(images)
}

fn collect_images(value: &Value, images: &mut Vec<String>) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                match (key.as_str(), child) {
                    (Some("image"), Value::String(image)) if !image.trim().is_empty() => {
                        images.push(image.trim().to_string());
                    }
                    _ => collect_images(child, images),
                }
            }
        }
        Value::Sequence(items) => {
            for item in items {
                collect_images(item, images);
            }
        }
        Value::Tagged(tagged) => collect_images(&tagged.value, images),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT_AND_SERVICE: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: controller
spec:
  template:
    spec:
      initContainers:
      - name: init
        image: gcr.io/knative-releases/init:v1
      containers:
      - name: controller
        image: gcr.io/knative-releases/controller@sha256:abc
      - name: sidecar
        image: gcr.io/knative-releases/init:v1
---
apiVersion: v1
kind: Service
metadata:
  name: controller
spec:
  type: LoadBalancer
---
apiVersion: v1
kind: Service
metadata:
  name: webhook
"#;

    #[test]
    fn test_list_kinds_is_distinct_and_sorted() {
        let kinds = list_kinds(DEPLOYMENT_AND_SERVICE).unwrap();
        assert_eq!(kinds, vec!["Deployment", "Service"]);
    }

    #[test]
    fn test_list_kinds_skips_empty_documents_and_missing_kinds() {
        let content = "---\n---\nmetadata:\n  name: no-kind\n---\nkind: Namespace\n";
        assert_eq!(list_kinds(content).unwrap(), vec!["Namespace"]);
        assert!(list_kinds("").unwrap().is_empty());
    }

    #[test]
    fn test_list_kinds_rejects_malformed_yaml() {
        let err = list_kinds("kind: [Deployment").unwrap_err();
        assert!(err.to_string().contains("error parsing content"));
    }

    #[test]
    fn test_list_images_preserves_order_and_duplicates() {
        let images = list_images(DEPLOYMENT_AND_SERVICE).unwrap();
        assert_eq!(
            images,
            vec![
                "gcr.io/knative-releases/init:v1",
                "gcr.io/knative-releases/controller@sha256:abc",
                "gcr.io/knative-releases/init:v1",
            ]
        );
    }

    #[test]
    fn test_list_images_finds_bare_docker_hub_images() {
        let content = "spec:\n  containers:\n  - image: mysql:5.6\n  name: mysql";
        assert_eq!(list_images(content).unwrap(), vec!["mysql:5.6"]);
    }

    #[test]
    fn test_non_string_image_values_are_ignored() {
        let content = "image:\n  repository: nginx\n  tag: latest\n";
        assert!(list_images(content).unwrap().is_empty());
    }
}
