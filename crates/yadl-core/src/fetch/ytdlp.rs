//! `yt-dlp` gateway: the production [`AudioFetcher`].
//!
//! Spawns the yt-dlp binary per item, with ffmpeg post-processing selected
//! through `--extract-audio`. Progress is read line-by-line from stdout via
//! `--newline` and a progress template; classification happens on stderr
//! content plus the exit status.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{AudioFetcher, FetchError, FetchRequest, Fetched, ProgressHook};
use crate::control::CancelFlag;

const PROGRESS_PREFIX: &str = "yadl-progress:";
const FILEPATH_PREFIX: &str = "yadl-filepath:";

/// Fetcher backed by the `yt-dlp` binary.
#[derive(Debug, Clone)]
pub struct YtdlpFetcher {
    binary: PathBuf,
}

impl YtdlpFetcher {
    /// Locate `yt-dlp` on PATH.
    pub fn discover() -> Result<Self, FetchError> {
        let binary = which::which("yt-dlp").map_err(|e| {
            FetchError::Collaborator(format!("yt-dlp not found on PATH: {}", e))
        })?;
        Ok(Self { binary })
    }

    /// Use a specific binary (tests, unusual installs).
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Probe whether a source is a playlist; returns its entry URLs if so.
    async fn probe_playlist(&self, source: &str) -> Result<Option<Vec<String>>, FetchError> {
        let output = Command::new(&self.binary)
            .arg("--flat-playlist")
            .arg("--print")
            .arg("%(url)s")
            .arg("--quiet")
            .arg("--no-warnings")
            .arg(source)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| FetchError::Collaborator(format!("spawn yt-dlp: {}", e)))?;

        if !output.status.success() {
            return Err(classify_stderr(&String::from_utf8_lossy(&output.stderr)));
        }

        let entries: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && *l != "NA")
            .map(str::to_string)
            .collect();

        // A single entry means the reference was a plain video.
        if entries.len() > 1 {
            Ok(Some(entries))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl AudioFetcher for YtdlpFetcher {
    async fn fetch(
        &self,
        req: FetchRequest,
        progress: ProgressHook,
        cancel: CancelFlag,
    ) -> Result<Fetched, FetchError> {
        if req.allow_playlist {
            if let Some(entries) = self.probe_playlist(&req.source).await? {
                return Ok(Fetched::Playlist { entries });
            }
        }

        tokio::fs::create_dir_all(&req.output_dir)
            .await
            .map_err(|e| FetchError::Collaborator(format!("output dir: {}", e)))?;

        let output_template = req.output_dir.join("%(title)s.%(ext)s");
        let mut child = Command::new(&self.binary)
            .arg(&req.source)
            .arg("--no-playlist")
            .arg("--newline")
            .arg("--no-warnings")
            .arg("--format")
            .arg("bestaudio/best")
            .arg("--extract-audio")
            .arg("--audio-format")
            .arg(req.format.as_str())
            .arg("--audio-quality")
            .arg(&req.quality)
            .arg("--output")
            .arg(output_template.as_os_str())
            .arg("--progress-template")
            .arg(format!(
                "{}%(progress.downloaded_bytes)s",
                PROGRESS_PREFIX
            ))
            .arg("--print")
            .arg(format!("after_move:{}%(filepath)s", FILEPATH_PREFIX))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FetchError::Collaborator(format!("spawn yt-dlp: {}", e)))?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "yadl_core::ytdlp", "{}", line);
                collected.push_str(&line);
                collected.push('\n');
            }
            collected
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut last_bytes = 0u64;
        let mut total_bytes = 0u64;
        let mut filepath: Option<PathBuf> = None;
        let mut poll = tokio::time::interval(Duration::from_millis(250));

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Ok(Some(line)) = line else { break };
                    if let Some(raw) = line.strip_prefix(PROGRESS_PREFIX) {
                        if let Ok(bytes) = raw.trim().parse::<u64>() {
                            // Counter restarts when yt-dlp moves to the next
                            // fragment or the post-processor takes over.
                            let delta = if bytes >= last_bytes {
                                bytes - last_bytes
                            } else {
                                bytes
                            };
                            last_bytes = bytes;
                            if delta > 0 {
                                total_bytes += delta;
                                progress(delta);
                            }
                        }
                    } else if let Some(path) = line.strip_prefix(FILEPATH_PREFIX) {
                        filepath = Some(PathBuf::from(path.trim()));
                    }
                }
                _ = poll.tick() => {
                    if cancel.is_cancelled() {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        stderr_task.abort();
                        return Err(FetchError::Cancelled);
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| FetchError::Collaborator(format!("wait for yt-dlp: {}", e)))?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(classify_stderr(&stderr_text));
        }

        let path = filepath.ok_or_else(|| {
            FetchError::Collaborator("yt-dlp exited 0 without reporting a file path".into())
        })?;
        Ok(Fetched::Audio {
            path,
            bytes: total_bytes,
        })
    }
}

/// Map yt-dlp stderr output onto a classified error.
fn classify_stderr(stderr: &str) -> FetchError {
    let lower = stderr.to_ascii_lowercase();
    let last_line = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("yt-dlp failed")
        .trim()
        .to_string();

    if lower.contains("429") || lower.contains("too many requests") || lower.contains("rate-limit")
    {
        return FetchError::RateLimited { retry_after: None };
    }
    if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("has been removed")
        || lower.contains("does not exist")
        || lower.contains("404")
    {
        return FetchError::NotFound(last_line);
    }
    if lower.contains("unsupported url") || lower.contains("is not a valid url") {
        return FetchError::Unsupported(last_line);
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return FetchError::Timeout;
    }
    if lower.contains("unable to download")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("temporary failure")
    {
        return FetchError::Network(last_line);
    }
    FetchError::Collaborator(last_line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_classification() {
        assert!(matches!(
            classify_stderr("ERROR: HTTP Error 429: Too Many Requests"),
            FetchError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_stderr("ERROR: Video unavailable"),
            FetchError::NotFound(_)
        ));
        assert!(matches!(
            classify_stderr("ERROR: Unsupported URL: gopher://x"),
            FetchError::Unsupported(_)
        ));
        assert!(matches!(
            classify_stderr("ERROR: unable to download video data"),
            FetchError::Network(_)
        ));
        assert!(matches!(
            classify_stderr("ERROR: The read operation timed out"),
            FetchError::Timeout
        ));
        assert!(matches!(
            classify_stderr("something unexpected"),
            FetchError::Collaborator(_)
        ));
    }
}
