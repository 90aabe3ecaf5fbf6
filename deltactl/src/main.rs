mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use miette::{miette, IntoDiagnostic};
use tokio::io::AsyncWriteExt;
use tonic::transport::{Channel, Endpoint};
use tonic::Streaming;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deltadiff_api::deltadiff::delta_diff_service_client::DeltaDiffServiceClient;
use deltadiff_api::deltadiff::{
    CalcImageDiffsRequest, CalculateDeltaDiffsResponse, Image, ManifestRequest,
};

use ocidelta::image_reference::basename;
use ocidelta::runtime::local::LocalRuntime;
use ocidelta::runtime::{ImageService, Runtime};
use ocidelta::{apply, assemble, Error, Manifest};

use crate::config::DeltactlConfig;

/// Command line arguments for the delta client
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Reference of the image to obtain
    target_image: String,
    /// Server address: a /-prefixed path connects over a unix socket
    server_address: String,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = DeltactlConfig::load()?;
    let started = Instant::now();

    let runtime = Arc::new(LocalRuntime::new(&config.runtime_root)?);

    // Locate an existing older version of the target to use as the base.
    let base_ref = find_base_image(&*runtime, &args.target_image)
        .await?
        .ok_or_else(|| {
            miette!(
                "no locally registered image shares a repository with {}; \
                 nothing to compute a delta against",
                args.target_image
            )
        })?;
    info!(base = %base_ref, target = %args.target_image, "found existing image, fetching diffs");

    let channel = connect(&args.server_address).await.into_diagnostic()?;
    let mut client = DeltaDiffServiceClient::new(channel);

    let request = CalcImageDiffsRequest {
        image1: Some(Image {
            reference: base_ref.clone(),
        }),
        image2: Some(Image {
            reference: args.target_image.clone(),
        }),
    };
    let request_started = Instant::now();
    let mut stream = client
        .calculate_delta_diffs(request)
        .await
        .into_diagnostic()?
        .into_inner();

    let compressed = received_patch_path(&config.patch_dir, &base_ref, &args.target_image);
    receive_patch(&mut stream, &compressed).await?;
    info!(elapsed = ?request_started.elapsed(), "delta received since request");

    let opts = config.apply_options();
    let raw_patch = apply::decompress_patch(&opts, &compressed).await?;

    // The server-side manifest of the target, resolved for this platform.
    let response = client
        .get_manifest(ManifestRequest {
            image: Some(Image {
                reference: args.target_image.clone(),
            }),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        })
        .await
        .into_diagnostic()?
        .into_inner();
    let mut manifest = Manifest::from_wire(&response.manifest)?;

    let layer = apply::apply_patch(&*runtime, &base_ref, &raw_patch, &opts).await?;
    let record = assemble::assemble_image(
        &*runtime,
        &mut manifest,
        layer,
        &response.image_config,
        &args.target_image,
    )
    .await?;

    info!(
        image = %record.name,
        digest = %record.target.digest,
        elapsed = ?started.elapsed(),
        "successfully patched image from delta"
    );
    Ok(())
}

/// First locally registered image sharing the target's repository (the
/// pre-`:` reference prefix) under a different full reference.
async fn find_base_image(rt: &dyn Runtime, target_ref: &str) -> Result<Option<String>, Error> {
    let repository = repository_prefix(target_ref);
    let images = rt.images().list().await?;
    Ok(images
        .into_iter()
        .map(|image| image.name)
        .find(|name| repository_prefix(name) == repository && name != target_ref))
}

fn repository_prefix(reference: &str) -> &str {
    reference
        .rsplit_once(':')
        .map(|(prefix, _)| prefix)
        .unwrap_or(reference)
}

fn received_patch_path(dir: &Path, base_ref: &str, target_ref: &str) -> PathBuf {
    dir.join(format!(
        "delta-diff-patch-from-{}-to-{}.zst",
        basename(base_ref),
        basename(target_ref)
    ))
}

/// Receive the delta stream into `path`, truncating on create. A transport
/// error mid-stream truncates the partial output before surfacing.
async fn receive_patch(
    stream: &mut Streaming<CalculateDeltaDiffsResponse>,
    path: &Path,
) -> Result<(), Error> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut received = 0u64;
    loop {
        match stream.message().await {
            Ok(Some(chunk)) => {
                file.write_all(&chunk.delta_diff).await?;
                received += chunk.delta_diff.len() as u64;
            }
            Ok(None) => break,
            Err(status) => {
                let _ = file.set_len(0).await;
                return Err(Error::StreamAborted(status.message().to_string()));
            }
        }
    }
    file.flush().await?;
    info!(bytes = received, file = %path.display(), "wrote delta diff file");
    Ok(())
}

async fn connect(address: &str) -> Result<Channel, tonic::transport::Error> {
    if address.starts_with('/') {
        let path = PathBuf::from(address);
        // The URI is required but ignored; the connector dials the socket.
        Endpoint::from_static("http://[::1]:50051")
            .connect_with_connector(tower::service_fn(move |_| {
                let path = path.clone();
                async move {
                    let stream = tokio::net::UnixStream::connect(path).await?;
                    Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(stream))
                }
            }))
            .await
    } else {
        Endpoint::from_shared(format!("http://{}", address))?
            .connect()
            .await
    }
}
