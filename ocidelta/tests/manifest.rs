use std::collections::BTreeMap;

use ocidelta::manifest::Manifest;
use ocidelta::models::{
    Descriptor, MEDIA_TYPE_DOCKER_LAYER_GZIP, MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_OCI_LAYER_GZIP,
    MEDIA_TYPE_OCI_MANIFEST, UNCOMPRESSED_LABEL,
};
use ocidelta::runtime::local::LocalRuntime;
use ocidelta::runtime::ContentStore;
use ocidelta::{Error, OciDigest};

async fn put(
    store: &LocalRuntime,
    media_type: &str,
    data: &[u8],
    labels: BTreeMap<String, String>,
) -> Descriptor {
    let desc = Descriptor {
        media_type: media_type.to_string(),
        digest: OciDigest::from_bytes(data),
        size: data.len() as i64,
        platform: None,
        annotations: None,
    };
    store.write_blob("test", data, &desc, labels).await.unwrap();
    desc
}

fn diff_label(diff_id: &OciDigest) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(UNCOMPRESSED_LABEL.to_string(), diff_id.to_string());
    labels
}

/// An image config with several diff-IDs, unknown top-level fields, and an
/// unknown field inside rootfs. Oddly spaced values so byte preservation is
/// observable.
fn config_fixture(layer_count: usize) -> Vec<u8> {
    let ids: Vec<String> = (0..layer_count)
        .map(|i| format!("\"{}\"", OciDigest::from_bytes(format!("diff-{}", i).as_bytes())))
        .collect();
    format!(
        concat!(
            "{{\"architecture\":\"amd64\",",
            "\"author\": \"build-bot <bot@example.com>\",",
            "\"history\":[{{\"created_by\":\"RUN  apk   add curl\"}}],",
            "\"os\":\"linux\",",
            "\"rootfs\":{{\"diff_ids\":[{}],\"type\":\"layers\",\"vendor_marker\": {{ \"keep\":  true }}}}}}"
        ),
        ids.join(",")
    )
    .into_bytes()
}

/// A manifest carrying `layer_count` layers, annotations, and an unknown
/// top-level key.
fn manifest_fixture(media_type: &str, config: &Descriptor, layer_count: usize) -> Vec<u8> {
    let layers: Vec<String> = (0..layer_count)
        .map(|i| {
            let digest = OciDigest::from_bytes(format!("layer-{}", i).as_bytes());
            format!(
                "{{\"mediaType\":\"{}\",\"digest\":\"{}\",\"size\":{}}}",
                MEDIA_TYPE_OCI_LAYER_GZIP,
                digest,
                100 + i
            )
        })
        .collect();
    format!(
        concat!(
            "{{\"annotations\":{{ \"org.example.build\" : \"nightly\" }},",
            "\"config\":{},",
            "\"layers\":[{}],",
            "\"mediaType\":\"{}\",",
            "\"schemaVersion\":2,",
            "\"vendor.extension\": [1, 2,  3]}}"
        ),
        serde_json::to_string(config).unwrap(),
        layers.join(","),
        media_type
    )
    .into_bytes()
}

#[tokio::test]
async fn load_rejects_non_object_json() {
    let root = tempfile::tempdir().unwrap();
    let store = LocalRuntime::new(root.path()).unwrap();
    let desc = put(&store, MEDIA_TYPE_OCI_MANIFEST, b"[1, 2, 3]", BTreeMap::new()).await;

    let err = Manifest::load(&store, &desc).await.unwrap_err();
    assert!(matches!(err, Error::Malformed(_)));
}

#[tokio::test]
async fn load_missing_blob_is_not_found() {
    let root = tempfile::tempdir().unwrap();
    let store = LocalRuntime::new(root.path()).unwrap();
    let desc = Descriptor {
        media_type: MEDIA_TYPE_OCI_MANIFEST.to_string(),
        digest: OciDigest::from_bytes(b"never stored"),
        size: 12,
        platform: None,
        annotations: None,
    };

    let err = Manifest::load(&store, &desc).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn platform_selection_picks_the_matching_child() {
    let root = tempfile::tempdir().unwrap();
    let store = LocalRuntime::new(root.path()).unwrap();

    let config = put(
        &store,
        "application/vnd.oci.image.config.v1+json",
        &config_fixture(1),
        BTreeMap::new(),
    )
    .await;
    let amd64 = put(
        &store,
        MEDIA_TYPE_OCI_MANIFEST,
        &manifest_fixture(MEDIA_TYPE_OCI_MANIFEST, &config, 1),
        BTreeMap::new(),
    )
    .await;
    let arm64 = put(
        &store,
        MEDIA_TYPE_OCI_MANIFEST,
        &manifest_fixture(MEDIA_TYPE_OCI_MANIFEST, &config, 2),
        BTreeMap::new(),
    )
    .await;

    let index = format!(
        concat!(
            "{{\"manifests\":[",
            "{{\"mediaType\":\"{}\",\"digest\":\"{}\",\"size\":{},\"platform\":{{\"os\":\"linux\",\"architecture\":\"amd64\"}}}},",
            "{{\"mediaType\":\"{}\",\"digest\":\"{}\",\"size\":{},\"platform\":{{\"os\":\"linux\",\"architecture\":\"arm64\"}}}}",
            "],\"mediaType\":\"application/vnd.oci.image.index.v1+json\",\"schemaVersion\":2}}"
        ),
        MEDIA_TYPE_OCI_MANIFEST, amd64.digest, amd64.size,
        MEDIA_TYPE_OCI_MANIFEST, arm64.digest, arm64.size,
    );
    let index_desc = put(
        &store,
        "application/vnd.oci.image.index.v1+json",
        index.as_bytes(),
        BTreeMap::new(),
    )
    .await;

    // architecture matching is case-insensitive
    let manifest = Manifest::load_from_list(&store, &index_desc, "linux", "ARM64")
        .await
        .unwrap();
    assert_eq!(manifest.descriptor().digest, arm64.digest);
    assert_ne!(manifest.descriptor().digest, amd64.digest);
}

#[tokio::test]
async fn platform_selection_fails_for_unknown_platform() {
    let root = tempfile::tempdir().unwrap();
    let store = LocalRuntime::new(root.path()).unwrap();

    let config = put(
        &store,
        "application/vnd.oci.image.config.v1+json",
        &config_fixture(1),
        BTreeMap::new(),
    )
    .await;
    let child = put(
        &store,
        MEDIA_TYPE_OCI_MANIFEST,
        &manifest_fixture(MEDIA_TYPE_OCI_MANIFEST, &config, 1),
        BTreeMap::new(),
    )
    .await;
    let index = format!(
        "{{\"manifests\":[{{\"mediaType\":\"{}\",\"digest\":\"{}\",\"size\":{},\"platform\":{{\"os\":\"linux\",\"architecture\":\"amd64\"}}}}],\"schemaVersion\":2}}",
        MEDIA_TYPE_OCI_MANIFEST, child.digest, child.size,
    );
    let index_desc = put(
        &store,
        "application/vnd.oci.image.index.v1+json",
        index.as_bytes(),
        BTreeMap::new(),
    )
    .await;

    let err = Manifest::load_from_list(&store, &index_desc, "linux", "riscv64")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFoundForPlatform { .. }));
}

#[tokio::test]
async fn replace_with_layer_consolidates_to_one_layer() {
    let root = tempfile::tempdir().unwrap();
    let store = LocalRuntime::new(root.path()).unwrap();

    let config_bytes = config_fixture(5);
    let config = put(
        &store,
        "application/vnd.oci.image.config.v1+json",
        &config_bytes,
        BTreeMap::new(),
    )
    .await;
    let manifest_bytes = manifest_fixture(MEDIA_TYPE_OCI_MANIFEST, &config, 5);
    let manifest_desc = put(&store, MEDIA_TYPE_OCI_MANIFEST, &manifest_bytes, BTreeMap::new()).await;

    let diff_id = OciDigest::from_bytes(b"uncompressed layer tar");
    let layer_data = b"compressed layer bytes";
    let layer = put(
        &store,
        MEDIA_TYPE_OCI_LAYER_GZIP,
        layer_data,
        diff_label(&diff_id),
    )
    .await;

    let mut manifest = Manifest::load(&store, &manifest_desc).await.unwrap();
    let annotations_before = manifest.document().get("annotations").unwrap().get().to_string();
    let vendor_before = manifest.document().get("vendor.extension").unwrap().get().to_string();

    manifest
        .replace_with_layer(&store, layer.clone(), Some(&config_bytes))
        .await
        .unwrap();

    // exactly one layer, in the parent family's media type
    let layers = manifest.layers().unwrap();
    assert_eq!(layers.len(), 1);
    assert_eq!(layers[0].media_type, MEDIA_TYPE_OCI_LAYER_GZIP);
    assert_eq!(layers[0].digest, layer.digest);

    // manifest media type preserved, descriptor rewritten
    assert_eq!(manifest.descriptor().media_type, MEDIA_TYPE_OCI_MANIFEST);
    assert_ne!(manifest.descriptor().digest, manifest_desc.digest);

    // the stored manifest blob matches the in-memory descriptor
    let stored = store.read_blob(&manifest.descriptor().digest).await.unwrap();
    assert_eq!(stored.len() as i64, manifest.descriptor().size);

    // untouched top-level fields survive byte-for-byte
    assert_eq!(
        manifest.document().get("annotations").unwrap().get(),
        annotations_before
    );
    assert_eq!(
        manifest.document().get("vendor.extension").unwrap().get(),
        vendor_before
    );

    // the rewritten config holds exactly the new diff-ID and keeps unknown
    // fields, including the one inside rootfs
    let new_config = manifest.config_descriptor().unwrap();
    assert_ne!(new_config.digest, config.digest);
    let config_blob = store.read_blob(&new_config.digest).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&config_blob).unwrap();
    let diff_ids = parsed["rootfs"]["diff_ids"].as_array().unwrap();
    assert_eq!(diff_ids.len(), 1);
    assert_eq!(diff_ids[0].as_str().unwrap(), diff_id.to_string());
    assert_eq!(parsed["author"].as_str().unwrap(), "build-bot <bot@example.com>");
    assert_eq!(parsed["rootfs"]["vendor_marker"]["keep"], serde_json::json!(true));

    // GC anchoring: one ref for the config plus one per layer
    let info = store.info(&manifest.descriptor().digest).await.unwrap();
    let gc_refs: Vec<_> = info
        .labels
        .iter()
        .filter(|(k, _)| k.starts_with("containerd.io/gc.ref.content."))
        .collect();
    assert_eq!(gc_refs.len(), 2);
    assert_eq!(
        info.labels.get("containerd.io/gc.ref.content.0").unwrap(),
        &new_config.digest.to_string()
    );
    assert_eq!(
        info.labels.get("containerd.io/gc.ref.content.1").unwrap(),
        &layer.digest.to_string()
    );
}

#[tokio::test]
async fn replace_with_layer_keeps_the_docker_family() {
    let root = tempfile::tempdir().unwrap();
    let store = LocalRuntime::new(root.path()).unwrap();

    let config_bytes = config_fixture(2);
    let config = put(
        &store,
        "application/vnd.docker.container.image.v1+json",
        &config_bytes,
        BTreeMap::new(),
    )
    .await;
    let manifest_desc = put(
        &store,
        MEDIA_TYPE_DOCKER_MANIFEST,
        &manifest_fixture(MEDIA_TYPE_DOCKER_MANIFEST, &config, 2),
        BTreeMap::new(),
    )
    .await;

    let diff_id = OciDigest::from_bytes(b"docker layer tar");
    let layer = put(&store, MEDIA_TYPE_OCI_LAYER_GZIP, b"docker layer", diff_label(&diff_id)).await;

    let mut manifest = Manifest::load(&store, &manifest_desc).await.unwrap();
    manifest
        .replace_with_layer(&store, layer, Some(&config_bytes))
        .await
        .unwrap();

    assert_eq!(manifest.descriptor().media_type, MEDIA_TYPE_DOCKER_MANIFEST);
    let layers = manifest.layers().unwrap();
    assert_eq!(layers[0].media_type, MEDIA_TYPE_DOCKER_LAYER_GZIP);
}

#[tokio::test]
async fn replace_with_layer_rejects_unknown_families() {
    let root = tempfile::tempdir().unwrap();
    let store = LocalRuntime::new(root.path()).unwrap();

    let config_bytes = config_fixture(1);
    let config = put(
        &store,
        "application/vnd.oci.image.config.v1+json",
        &config_bytes,
        BTreeMap::new(),
    )
    .await;
    let manifest_desc = put(
        &store,
        "application/vnd.example.manifest+json",
        &manifest_fixture("application/vnd.example.manifest+json", &config, 1),
        BTreeMap::new(),
    )
    .await;

    let diff_id = OciDigest::from_bytes(b"tar");
    let layer = put(&store, MEDIA_TYPE_OCI_LAYER_GZIP, b"layer", diff_label(&diff_id)).await;

    let mut manifest = Manifest::load(&store, &manifest_desc).await.unwrap();
    let err = manifest
        .replace_with_layer(&store, layer, Some(&config_bytes))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedMediaType(_)));
}

#[tokio::test]
async fn replace_with_layer_requires_the_diff_id_label() {
    let root = tempfile::tempdir().unwrap();
    let store = LocalRuntime::new(root.path()).unwrap();

    let config_bytes = config_fixture(3);
    let config = put(
        &store,
        "application/vnd.oci.image.config.v1+json",
        &config_bytes,
        BTreeMap::new(),
    )
    .await;
    let manifest_desc = put(
        &store,
        MEDIA_TYPE_OCI_MANIFEST,
        &manifest_fixture(MEDIA_TYPE_OCI_MANIFEST, &config, 3),
        BTreeMap::new(),
    )
    .await;

    // layer blob stored without the uncompressed-digest label
    let layer = put(&store, MEDIA_TYPE_OCI_LAYER_GZIP, b"unlabelled layer", BTreeMap::new()).await;

    let mut manifest = Manifest::load(&store, &manifest_desc).await.unwrap();
    let err = manifest
        .replace_with_layer(&store, layer, Some(&config_bytes))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingDiffId));

    // the manifest is untouched: same descriptor, same layer list
    assert_eq!(manifest.descriptor().digest, manifest_desc.digest);
    assert_eq!(manifest.layers().unwrap().len(), 3);
}

#[tokio::test]
async fn wire_round_trip_preserves_document_and_descriptor() {
    let root = tempfile::tempdir().unwrap();
    let store = LocalRuntime::new(root.path()).unwrap();

    let config = put(
        &store,
        "application/vnd.oci.image.config.v1+json",
        &config_fixture(2),
        BTreeMap::new(),
    )
    .await;
    let manifest_desc = put(
        &store,
        MEDIA_TYPE_OCI_MANIFEST,
        &manifest_fixture(MEDIA_TYPE_OCI_MANIFEST, &config, 2),
        BTreeMap::new(),
    )
    .await;

    let manifest = Manifest::load(&store, &manifest_desc).await.unwrap();
    let wire = manifest.to_wire().unwrap();
    let decoded = Manifest::from_wire(&wire).unwrap();

    assert_eq!(decoded.descriptor(), manifest.descriptor());
    assert_eq!(
        decoded.document().keys().collect::<Vec<_>>(),
        manifest.document().keys().collect::<Vec<_>>()
    );
    for (key, value) in manifest.document() {
        assert_eq!(decoded.document().get(key).unwrap().get(), value.get());
    }
}
