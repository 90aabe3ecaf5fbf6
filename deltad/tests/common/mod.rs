#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tokio_stream::StreamExt;
use tonic::Status;

use deltadiff_api::deltadiff::CalculateDeltaDiffsResponse;
use ocidelta::models::{
    Descriptor, MEDIA_TYPE_OCI_CONFIG, MEDIA_TYPE_OCI_LAYER_GZIP, MEDIA_TYPE_OCI_MANIFEST,
};
use ocidelta::runtime::local::LocalRuntime;
use ocidelta::runtime::{ContentStore, DiffService, ImageRecord, ImageService, Mount};
use ocidelta::OciDigest;

pub fn bind(dir: &Path) -> Vec<Mount> {
    vec![Mount {
        fstype: "bind".to_string(),
        source: dir.to_path_buf(),
        options: vec![],
    }]
}

pub fn write_tree(dir: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
}

pub async fn put(store: &LocalRuntime, media_type: &str, data: &[u8]) -> Descriptor {
    let desc = Descriptor {
        media_type: media_type.to_string(),
        digest: OciDigest::from_bytes(data),
        size: data.len() as i64,
        platform: None,
        annotations: None,
    };
    store
        .write_blob("test", data, &desc, BTreeMap::new())
        .await
        .unwrap();
    desc
}

/// Register a single-layer image whose rootfs holds `files`, unpacked.
pub async fn seed_image(rt: &LocalRuntime, name: &str, files: &[(&str, &str)]) -> ImageRecord {
    let tree = tempfile::tempdir().unwrap();
    write_tree(tree.path(), files);
    let empty = tempfile::tempdir().unwrap();

    let layer = rt
        .compare(
            &bind(empty.path()),
            &bind(tree.path()),
            MEDIA_TYPE_OCI_LAYER_GZIP,
            "seed",
        )
        .await
        .unwrap();
    let diff_id = rt.info(&layer.digest).await.unwrap().labels["containerd.io/uncompressed"].clone();

    let config = serde_json::json!({
        "architecture": std::env::consts::ARCH,
        "os": std::env::consts::OS,
        "rootfs": {"type": "layers", "diff_ids": [diff_id]},
    });
    let config_desc = put(rt, MEDIA_TYPE_OCI_CONFIG, &serde_json::to_vec(&config).unwrap()).await;

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_OCI_MANIFEST,
        "config": config_desc,
        "layers": [layer],
    });
    let manifest_desc = put(rt, MEDIA_TYPE_OCI_MANIFEST, &serde_json::to_vec(&manifest).unwrap()).await;

    let record = rt
        .create(ImageRecord {
            name: name.to_string(),
            target: manifest_desc,
        })
        .await
        .unwrap();
    rt.unpack(name).await.unwrap();
    record
}

/// Drain a delta stream into one buffer.
pub async fn collect_stream<S>(stream: S) -> Result<Vec<u8>, Status>
where
    S: StreamExt<Item = Result<CalculateDeltaDiffsResponse, Status>> + Unpin,
{
    let mut stream = stream;
    let mut bytes = Vec::new();
    while let Some(chunk) = stream.next().await {
        bytes.extend(chunk?.delta_diff);
    }
    Ok(bytes)
}

pub fn assert_trees_equal(left: &Path, right: &Path) {
    let mut left_names: Vec<_> = fs::read_dir(left)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    let mut right_names: Vec<_> = fs::read_dir(right)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    left_names.sort();
    right_names.sort();
    assert_eq!(left_names, right_names, "{:?} vs {:?}", left, right);

    for name in left_names {
        let l = left.join(&name);
        let r = right.join(&name);
        let l_meta = fs::symlink_metadata(&l).unwrap();
        if l_meta.is_dir() {
            assert_trees_equal(&l, &r);
        } else if l_meta.file_type().is_symlink() {
            assert_eq!(fs::read_link(&l).unwrap(), fs::read_link(&r).unwrap());
        } else {
            assert_eq!(fs::read(&l).unwrap(), fs::read(&r).unwrap(), "{:?}", l);
        }
    }
}

/// Whether a host binary is runnable; pipeline tests are skipped otherwise.
pub fn have_binary(name: &str) -> bool {
    std::process::Command::new(name)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
