//! Wire types for the fnOS video API.
//!
//! All responses arrive wrapped in [`ApiEnvelope`]. Most numeric flags come
//! back as either integers or booleans depending on the server build, so the
//! flag fields use a lenient deserializer.

use serde::{Deserialize, Deserializer, Serialize};

/// Response envelope shared by every fnOS endpoint. `code == 0` is success.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

/// Accepts `1`, `true`, `"1"` and friends as true.
fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let v = serde_json::Value::deserialize(d)?;
    Ok(match v {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        serde_json::Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub uid: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub avatar: String,
}

/// `play/info` response: the playable file selection for an item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayInfo {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub parent_guid: String,
    #[serde(default)]
    pub grand_guid: String,
    /// Resume position in seconds.
    #[serde(default)]
    pub ts: f64,
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub video_guid: String,
    #[serde(default)]
    pub audio_guid: String,
    #[serde(default)]
    pub subtitle_guid: String,
    #[serde(default)]
    pub media_guid: String,
    #[serde(default)]
    pub item: ItemDetail,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemDetail {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tv_title: String,
    #[serde(default)]
    pub parent_title: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub runtime: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub watched_ts: f64,
    #[serde(default, deserialize_with = "flag")]
    pub is_watched: bool,
    #[serde(default, deserialize_with = "flag")]
    pub is_favorite: bool,
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub season_number: i32,
    #[serde(default)]
    pub episode_number: i32,
    #[serde(default)]
    pub air_date: String,
    #[serde(default)]
    pub play_item_guid: String,
}

/// `stream/list/{guid}` response: every file plus its probed streams.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamList {
    #[serde(default)]
    pub files: Vec<FileInfo>,
    #[serde(default)]
    pub video_streams: Vec<VideoStream>,
    #[serde(default)]
    pub audio_streams: Vec<AudioStream>,
    #[serde(default)]
    pub subtitle_streams: Vec<SubtitleStream>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileInfo {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub size: Option<i64>,
}

impl FileInfo {
    /// Basename of the stored path, used for container detection.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoStream {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub media_guid: String,
    #[serde(default)]
    pub codec_name: String,
    #[serde(default)]
    pub height: i64,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub bps: Option<i64>,
    #[serde(default)]
    pub bit_depth: Option<i64>,
    #[serde(default)]
    pub refs: Option<i64>,
    #[serde(default, deserialize_with = "flag")]
    pub progressive: bool,
    #[serde(default)]
    pub avg_frame_rate: String,
    #[serde(default)]
    pub r_frame_rate: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub level: Option<i64>,
    #[serde(default)]
    pub pix_fmt: Option<String>,
    #[serde(default)]
    pub display_aspect_ratio: Option<String>,
    #[serde(default)]
    pub color_space: Option<String>,
    #[serde(default)]
    pub color_transfer: Option<String>,
    #[serde(default)]
    pub color_primaries: Option<String>,
    /// Marketing label such as "4K" or "1080P", preferred over raw height.
    #[serde(default)]
    pub resolution_type: Option<String>,
    /// "SDR", "HDR10", "DV" and similar.
    #[serde(default)]
    pub color_range_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioStream {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub media_guid: String,
    #[serde(default)]
    pub codec_name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub bps: Option<i64>,
    #[serde(default)]
    pub channels: Option<i64>,
    #[serde(default)]
    pub channel_layout: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubtitleStream {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub media_guid: String,
    #[serde(default)]
    pub index: Option<i64>,
    #[serde(default)]
    pub codec_name: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub is_default: bool,
    #[serde(default, deserialize_with = "flag")]
    pub forced: bool,
    #[serde(default, deserialize_with = "flag")]
    pub is_bitmap: bool,
    #[serde(default, deserialize_with = "flag")]
    pub is_external: bool,
}

impl SubtitleStream {
    pub fn codec(&self) -> &str {
        self.codec_name
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.format.as_deref())
            .unwrap_or("srt")
    }
}

/// `stream` response for a concrete media file. Cloud-hosted files carry
/// direct links plus the cookies the cloud host requires.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamResponse {
    #[serde(default)]
    pub cloud_storage_info: Option<CloudStorageInfo>,
    #[serde(default)]
    pub direct_link_qualities: Option<Vec<DirectLinkQuality>>,
    #[serde(default)]
    pub header: Option<StreamHeader>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudStorageInfo {
    #[serde(default)]
    pub cloud_storage_type: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectLinkQuality {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamHeader {
    #[serde(default, rename = "Cookie")]
    pub cookie: Option<Vec<String>>,
}

/// Body for `play/play`, which starts a server-side transcode session.
#[derive(Debug, Clone, Serialize)]
pub struct PlayRequest {
    pub media_guid: String,
    pub video_guid: String,
    pub video_encoder: String,
    pub resolution: String,
    pub bitrate: i64,
    #[serde(rename = "startTimestamp")]
    pub start_timestamp: i64,
    pub audio_encoder: String,
    pub audio_guid: String,
    pub subtitle_guid: String,
    pub channels: i32,
    pub forced_sdr: i32,
}

/// `play/play` response. `play_link` embeds the transcode session guid as
/// `/v/media/{session}/...`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayStartResponse {
    pub play_link: String,
    #[serde(default)]
    pub media_guid: String,
    #[serde(default)]
    pub video_guid: String,
    #[serde(default)]
    pub audio_guid: String,
    #[serde(default)]
    pub hls_time: i32,
}
