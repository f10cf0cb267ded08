//! `qdm fetch` – submit URLs to the manager and wait for all of them.

use anyhow::{bail, Context, Result};
use qdm_core::{ChannelSink, DownloadEvent, DownloadManager, QdmConfig};
use std::path::PathBuf;
use std::time::Duration;

#[allow(clippy::too_many_arguments)]
pub async fn run_fetch(
    mut cfg: QdmConfig,
    urls: Vec<String>,
    out: Option<PathBuf>,
    agents: Option<usize>,
    priority: i32,
    tag: Option<String>,
    no_resume: bool,
) -> Result<()> {
    if let Some(agents) = agents {
        cfg.agent_count = agents;
    }
    if no_resume {
        cfg.resume = false;
    }
    let out_dir = out.unwrap_or_else(|| PathBuf::from("."));

    let (sink, mut events) = ChannelSink::new();
    let mgr = DownloadManager::with_defaults(&cfg, Box::new(sink))
        .context("failed to initialize download manager")?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                DownloadEvent::Started {
                    serial_id,
                    uri,
                    current_length,
                    ..
                } => {
                    if current_length > 0 {
                        println!("[{}] resuming {} at {} bytes", serial_id, uri, current_length);
                    } else {
                        println!("[{}] downloading {}", serial_id, uri);
                    }
                }
                DownloadEvent::Updated {
                    serial_id,
                    current_length,
                    ..
                } => {
                    tracing::debug!(serial_id, current_length, "progress");
                }
                DownloadEvent::Succeeded {
                    serial_id,
                    path,
                    final_length,
                    ..
                } => {
                    println!(
                        "[{}] done: {} ({} bytes)",
                        serial_id,
                        path.display(),
                        final_length
                    );
                }
                DownloadEvent::Failed {
                    serial_id,
                    uri,
                    error,
                    ..
                } => {
                    println!("[{}] failed: {} ({})", serial_id, uri, error);
                }
            }
        }
    });

    let mut serials = Vec::with_capacity(urls.len());
    for url in &urls {
        let dest = out_dir.join(filename_for(url));
        let serial = mgr.submit(dest, url.clone(), tag.clone(), priority, None)?;
        serials.push(serial);
    }

    let mut failures = 0usize;
    for serial in serials {
        if mgr.await_completion(serial).await != Some(true) {
            failures += 1;
        }
    }

    // Dropping the manager closes the sink; give the printer a moment to
    // drain the tail of the channel.
    drop(mgr);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    if failures > 0 {
        bail!("{} of {} downloads failed", failures, urls.len());
    }
    Ok(())
}

/// Destination filename from the URL's last path segment.
fn filename_for(url: &str) -> String {
    let name = url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(str::to_string)
        })
        .unwrap_or_default();
    if name.is_empty() {
        "download.bin".to_string()
    } else {
        name
    }
}
