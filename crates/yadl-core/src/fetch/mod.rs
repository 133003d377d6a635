//! Fetch/transcode collaborator boundary.
//!
//! The core never talks to the video platform itself. Everything past
//! "here is a source reference and a target format" is behind the
//! [`AudioFetcher`] trait; the production implementation drives the
//! `yt-dlp` binary (see [`ytdlp`]), tests use a scripted fetcher.

mod ytdlp;

pub use ytdlp::YtdlpFetcher;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AudioFormat;
use crate::control::CancelFlag;

/// Byte-progress callback invoked with deltas as a transfer advances.
/// Called from worker tasks; implementations must be cheap and must not
/// block on I/O.
pub type ProgressHook = Arc<dyn Fn(u64) + Send + Sync>;

/// One unit of work handed to the collaborator.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Source reference exactly as given in the input list.
    pub source: String,
    pub format: AudioFormat,
    /// Target quality in kbps.
    pub quality: String,
    pub output_dir: PathBuf,
    /// When true and the source resolves to a playlist, the collaborator
    /// returns the entries instead of downloading anything. When false a
    /// playlist reference yields its first entry only.
    pub allow_playlist: bool,
}

/// Successful collaborator result.
#[derive(Debug, Clone)]
pub enum Fetched {
    /// A finished local audio file.
    Audio { path: PathBuf, bytes: u64 },
    /// The source was a playlist; these are its entry references, in
    /// playlist order. Nothing was downloaded.
    Playlist { entries: Vec<String> },
}

/// Classified failure from one fetch attempt. The retry policy maps these
/// onto Transient / RateLimited / Permanent (see `retry::classify`).
#[derive(Debug, Clone)]
pub enum FetchError {
    /// Network-level trouble: DNS, reset connections, incomplete reads.
    Network(String),
    /// The attempt exceeded the configured per-item timeout.
    Timeout,
    /// The platform asked us to slow down, optionally saying how long.
    RateLimited { retry_after: Option<Duration> },
    /// The reference points at nothing (removed, private, never existed).
    NotFound(String),
    /// The collaborator cannot handle this reference or format.
    Unsupported(String),
    /// The collaborator itself malfunctioned (binary missing, bad exit).
    Collaborator(String),
    /// The attempt was aborted because its cancel token fired. Only ever
    /// produced in response to cancellation; a real failure that happens
    /// to land after cancellation keeps its own variant.
    Cancelled,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Network(msg) => write!(f, "network error: {}", msg),
            FetchError::Timeout => write!(f, "timed out"),
            FetchError::RateLimited { retry_after: Some(d) } => {
                write!(f, "rate limited (retry after {}s)", d.as_secs())
            }
            FetchError::RateLimited { retry_after: None } => write!(f, "rate limited"),
            FetchError::NotFound(msg) => write!(f, "not found: {}", msg),
            FetchError::Unsupported(msg) => write!(f, "unsupported: {}", msg),
            FetchError::Collaborator(msg) => write!(f, "collaborator failure: {}", msg),
            FetchError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for FetchError {}

/// External fetch/transcode collaborator.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Resolve and download one source reference into a local audio file,
    /// or expand it into playlist entries. Streams byte deltas through
    /// `progress`. `cancel` is cooperative: an implementation may abort the
    /// transfer when it is set, or ignore it and finish the attempt.
    async fn fetch(
        &self,
        req: FetchRequest,
        progress: ProgressHook,
        cancel: CancelFlag,
    ) -> Result<Fetched, FetchError>;
}
