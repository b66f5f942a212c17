//! Offline tests of a complete bundle manifest through the public API
//!
//! These tests tell the story of a bundle as the installer sees it before
//! anything reaches a cluster: what it declares, where its images go, and how
//! a pre-computed relocation mapping rewrites it.

use kab::crd::Manifest;
use kab::relocate::{destination, relocate_from_mapping_file};
use kab::scan::{list_images, list_kinds};

const BUNDLE: &str = r#"apiVersion: projectriff.io/v1alpha1
kind: Manifest
metadata:
  name: riff
spec:
  resources:
  - name: istio
    namespace: istio-system
    content: |
      apiVersion: v1
      kind: Namespace
      metadata:
        name: istio-system
      ---
      apiVersion: apps/v1
      kind: Deployment
      metadata:
        name: pilot
        namespace: istio-system
      spec:
        template:
          spec:
            containers:
            - name: discovery
              image: docker.io/istio/pilot:1.0.1
    checks:
    - kind: Pod
      selector:
        matchLabels:
          istio: pilot
      pattern: Running
  - name: riff
    content: |
      apiVersion: v1
      kind: Service
      metadata:
        name: riff
      spec:
        type: LoadBalancer
      ---
      apiVersion: apps/v1
      kind: Deployment
      metadata:
        name: riff
      spec:
        template:
          spec:
            containers:
            - name: controller
              image: gcr.io/projectriff/controller:0.1
            - name: sidecar
              image: docker.io/istio/pilot:1.0.1
  - name: build
    deferred: true
    path: build.yaml
"#;

fn bundle() -> Manifest {
    Manifest::from_yaml(BUNDLE).expect("bundle should parse")
}

fn contents(manifest: &Manifest) -> Vec<&str> {
    manifest
        .spec
        .resources
        .iter()
        .filter_map(|r| r.inline_content())
        .collect()
}

// =============================================================================
// Stories
// =============================================================================

/// Story: uninstall needs every kind the bundle declares, once
#[test]
fn story_bundle_declares_its_kinds() {
    let manifest = bundle();
    let mut kinds = Vec::new();
    for content in contents(&manifest) {
        kinds.extend(list_kinds(content).unwrap());
    }
    kinds.sort();
    kinds.dedup();

    assert_eq!(kinds, vec!["Deployment", "Namespace", "Service"]);
    assert!(manifest.spec.resources[2].deferred);
}

/// Story: relocation discovers every image reference and gives each a flat
/// destination in the private registry
#[test]
fn story_bundle_images_map_to_flat_destinations() {
    let manifest = bundle();
    let mut images = Vec::new();
    for content in contents(&manifest) {
        images.extend(list_images(content).unwrap());
    }

    assert_eq!(
        images,
        vec![
            "docker.io/istio/pilot:1.0.1",
            "gcr.io/projectriff/controller:0.1",
            "docker.io/istio/pilot:1.0.1",
        ]
    );
    assert_eq!(
        destination(&images[0], "registry.local"),
        "registry.local/istio-pilot:1.0.1"
    );
    assert_eq!(
        destination(&images[1], "registry.local"),
        "registry.local/projectriff-controller:0.1"
    );
}

/// Story: a bundle runtime mounts a relocation mapping next to the bundle
#[tokio::test]
async fn story_mounted_mapping_relocates_the_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let mapping = dir.path().join("relocation-mapping.json");
    std::fs::write(
        &mapping,
        r#"{
            "docker.io/istio/pilot:1.0.1": "registry.local/istio-pilot@sha256:aa",
            "gcr.io/projectriff/controller:0.1": "registry.local/projectriff-controller@sha256:bb"
        }"#,
    )
    .unwrap();

    let mut manifest = bundle();
    assert!(relocate_from_mapping_file(&mut manifest, &mapping)
        .await
        .unwrap());

    let rewritten = contents(&manifest).join("\n");
    assert!(!rewritten.contains("docker.io"));
    assert!(!rewritten.contains("gcr.io"));
    assert!(rewritten.contains("image: registry.local/istio-pilot@sha256:aa"));
    assert!(rewritten.contains("image: registry.local/projectriff-controller@sha256:bb"));
    // resources without inline content are left alone
    assert_eq!(manifest.spec.resources[2].path.as_deref(), Some("build.yaml"));
}
