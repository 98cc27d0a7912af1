//! Streaming file download with a terminal progress bar.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use ctsearch_core::Result;

fn progress_bar(total: Option<u64>, label: &str) -> ProgressBar {
    let pb = match total {
        Some(len) => ProgressBar::new(len),
        None => ProgressBar::new_spinner(),
    };
    pb.set_style(
        ProgressStyle::with_template(
            "{msg} [{elapsed_precise}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(8));
    pb.set_message(format!("Downloading {label}"));
    pb.enable_steady_tick(Duration::from_millis(250));
    pb
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    output.with_file_name(name)
}

/// Fetch `url` and stream the body into `output`.
pub(crate) async fn stream_to_file(
    client: &reqwest::Client,
    url: &str,
    output: &Path,
) -> Result<u64> {
    info!(
        subsystem = "ingest",
        component = "download",
        url,
        path = %output.display(),
        "Downloading file"
    );
    let response = client.get(url).send().await?.error_for_status()?;
    save_response(response, output).await
}

/// Stream a response body into `output`, returning the number of bytes
/// written.
///
/// Bytes land in a `.part` sibling first and are renamed into place only
/// after the body completes.
pub(crate) async fn save_response(response: reqwest::Response, output: &Path) -> Result<u64> {
    let start = Instant::now();
    let url = response.url().to_string();
    let label = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| url.clone());
    let pb = progress_bar(response.content_length(), &label);

    let part = partial_path(output);
    let mut file = fs::File::create(&part).await?;
    let mut written: u64 = 0;
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                pb.abandon();
                drop(file);
                let _ = fs::remove_file(&part).await;
                return Err(e.into());
            }
        };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        pb.set_position(written);
    }

    file.flush().await?;
    drop(file);
    fs::rename(&part, output).await?;
    pb.finish_and_clear();

    debug!(
        subsystem = "ingest",
        component = "download",
        op = "save_response",
        url = %url,
        bytes = written,
        duration_ms = start.elapsed().as_millis() as u64,
        "Download complete"
    );
    Ok(written)
}

/// Join a site-relative path onto `base`. Absolute URLs pass through.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Today's date as used in snapshot file names.
pub(crate) fn date_stamp() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}
