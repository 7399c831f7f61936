//! Wire and domain types shared across the job lifecycle, the extractor
//! boundary, and the HTTP edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A job's position in the §4.11 state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

/// Caller-supplied parameters for a download, validated before a `Job` is
/// ever created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadParams {
    pub url: String,
    pub format_id: Option<String>,
    pub output_template: Option<String>,
    #[serde(default)]
    pub audio_only: bool,
    pub audio_format: Option<String>,
    pub audio_quality: Option<u16>,
    #[serde(default)]
    pub subtitles: bool,
    pub subtitle_lang: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
}

/// A recorded unit of asynchronous extractor work, exclusively owned by the
/// job store and mutated only by the worker that currently holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub state: JobState,
    pub url: String,
    pub params: DownloadParams,
    pub progress: u8,
    pub attempt_count: u32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub file_path: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pinned_file: Option<String>,
}

impl Job {
    pub fn new(id: String, url: String, params: DownloadParams) -> Self {
        Self {
            id,
            state: JobState::Pending,
            url,
            params,
            progress: 0,
            attempt_count: 0,
            error_code: None,
            error_message: None,
            file_path: None,
            file_size_bytes: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            pinned_file: None,
        }
    }
}

/// One entry of the extractor's `formats` array. Re-sorted by quality
/// descending before being handed to a caller; see §9.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatInfo {
    pub format_id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub abr: Option<f64>,
    #[serde(default)]
    pub tbr: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
}

impl FormatInfo {
    /// `video+audio` > `video-only` > `audio-only`, per §9's resolved
    /// ordering question.
    fn format_type_rank(&self) -> u8 {
        let has_video = self
            .vcodec
            .as_deref()
            .map(|c| c != "none")
            .unwrap_or(false);
        let has_audio = self
            .acodec
            .as_deref()
            .map(|c| c != "none")
            .unwrap_or(false);
        match (has_video, has_audio) {
            (true, true) => 2,
            (true, false) => 1,
            _ => 0,
        }
    }

    fn bitrate(&self) -> f64 {
        self.tbr.or(self.abr).unwrap_or(0.0)
    }

    /// Sort key for the stable lexicographic tuple
    /// `(format_type, resolution_height, bitrate)` descending.
    pub fn sort_key(&self) -> (u8, u32, i64) {
        (
            self.format_type_rank(),
            self.height.unwrap_or(0),
            (self.bitrate() * 1000.0) as i64,
        )
    }
}

/// One subtitle track entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub ext: String,
    #[serde(default)]
    pub auto: bool,
}

/// The explicit, partially-optional record the extractor's loosely typed
/// JSON output is decoded into. Unknown fields are ignored by `serde`
/// default (no `deny_unknown_fields`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: Option<String>,
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub view_count: Option<u64>,
    pub thumbnail: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
    #[serde(default)]
    pub subtitles: HashMap<String, Vec<SubtitleTrack>>,
}

impl VideoMetadata {
    /// Sorts `formats` in place by the resolved quality ordering, descending.
    pub fn sort_formats_desc(&mut self) {
        self.formats
            .sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    }
}

/// The metadata substitution set a `ValidatedTemplate` may draw on.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub title: String,
    pub id: String,
    pub ext: String,
    pub upload_date: String,
    pub uploader: String,
    pub resolution: String,
    pub format_id: String,
}

impl TemplateContext {
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "title" => Some(&self.title),
            "id" => Some(&self.id),
            "ext" => Some(&self.ext),
            "upload_date" => Some(&self.upload_date),
            "uploader" => Some(&self.uploader),
            "resolution" => Some(&self.resolution),
            "format_id" => Some(&self.format_id),
            _ => None,
        }
    }
}
