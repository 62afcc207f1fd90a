//! Rendition resolution.
//!
//! An fnOS item owns a set of probed streams spread across one or more
//! media files. This module regroups them per file into the Jellyfin
//! `MediaSource` shape: one source per rendition, sorted best-first, with
//! contiguous stream indices and external subtitles exposed as deliverable
//! streams.

use dashmap::DashMap;

use fnbridge_fnos::types::{AudioStream, FileInfo, StreamList, SubtitleStream, VideoStream};

use crate::models::{MediaSourceInfo, MediaStream};

/// Codecs browsers decode natively. A rendition whose audio tracks are all
/// outside this list cannot be direct-streamed.
const BROWSER_COMPATIBLE_CODECS: &[&str] = &[
    "aac",
    "mp3",
    "flac",
    "opus",
    "vorbis",
    "pcm_s16le",
    "pcm_f32le",
];

/// What the bridge needs later to serve one external subtitle track.
#[derive(Debug, Clone)]
pub struct SubtitleInfo {
    pub guid: String,
    pub backend_index: i32,
    pub language: String,
    pub title: String,
    pub codec: String,
}

#[derive(Debug, Default)]
pub struct RenditionResolver {
    /// "{rendition}:{stream index}" to subtitle details.
    subtitles: DashMap<String, SubtitleInfo>,
}

impl RenditionResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn subtitle_info(&self, rendition: &str, index: i32) -> Option<SubtitleInfo> {
        self.subtitles
            .get(&format!("{rendition}:{index}"))
            .map(|v| v.value().clone())
    }

    /// Build one `MediaSource` per rendition of `item_id`, best resolution
    /// first.
    pub fn build_sources(
        &self,
        item_id: &str,
        streams: &StreamList,
        duration: f64,
    ) -> Vec<MediaSourceInfo> {
        let mut media_guids: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for vs in &streams.video_streams {
            if !vs.media_guid.is_empty() && seen.insert(vs.media_guid.clone()) {
                media_guids.push(vs.media_guid.clone());
            }
        }

        // Items probed without video metadata still get one source built
        // from whatever file the backend lists.
        if media_guids.is_empty() {
            let file = streams.files.first();
            let rendition = file.map(|f| f.guid.as_str()).unwrap_or("unknown");
            return vec![self.build_single(
                item_id,
                rendition,
                file,
                &streams.video_streams.iter().collect::<Vec<_>>(),
                &streams.audio_streams.iter().collect::<Vec<_>>(),
                &streams.subtitle_streams.iter().collect::<Vec<_>>(),
                duration,
            )];
        }

        let height_of = |guid: &str| {
            streams
                .video_streams
                .iter()
                .find(|v| v.media_guid == guid)
                .map(|v| v.height)
                .unwrap_or(0)
        };
        media_guids.sort_by_key(|g| std::cmp::Reverse(height_of(g)));

        media_guids
            .iter()
            .map(|rendition| {
                let videos: Vec<&VideoStream> = streams
                    .video_streams
                    .iter()
                    .filter(|v| &v.media_guid == rendition)
                    .collect();
                let audios: Vec<&AudioStream> = streams
                    .audio_streams
                    .iter()
                    .filter(|a| &a.media_guid == rendition)
                    .collect();
                let subs: Vec<&SubtitleStream> = streams
                    .subtitle_streams
                    .iter()
                    .filter(|s| &s.media_guid == rendition)
                    .collect();
                let file = streams.files.iter().find(|f| &f.guid == rendition);
                self.build_single(item_id, rendition, file, &videos, &audios, &subs, duration)
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn build_single(
        &self,
        item_id: &str,
        rendition: &str,
        file: Option<&FileInfo>,
        videos: &[&VideoStream],
        audios: &[&AudioStream],
        subtitles: &[&SubtitleStream],
        duration: f64,
    ) -> MediaSourceInfo {
        let mut index: i32 = 0;
        let mut media_streams = Vec::new();

        for vs in videos {
            media_streams.push(map_video_stream(vs, index));
            index += 1;
        }

        let audio_start = index;
        for audio in audios {
            media_streams.push(map_audio_stream(audio, index));
            index += 1;
        }
        let default_audio = audios
            .iter()
            .position(|a| is_browser_compatible(&a.codec_name))
            .map(|i| audio_start + i as i32)
            .unwrap_or(audio_start);

        // Embedded subtitles would need the container fetched and parsed,
        // so only external tracks are exposed.
        for sub in subtitles.iter().filter(|s| s.is_external) {
            let mut stream = map_subtitle_stream(sub, index);
            stream.delivery_method = Some("External".into());
            stream.delivery_url = Some(format!(
                "/Videos/{rendition}/{rendition}/Subtitles/{index}/Stream.vtt"
            ));
            media_streams.push(stream);

            if !sub.guid.is_empty() {
                self.subtitles.insert(
                    format!("{rendition}:{index}"),
                    SubtitleInfo {
                        guid: sub.guid.clone(),
                        backend_index: sub.index.unwrap_or(i64::from(index)) as i32,
                        language: sub.language.clone().unwrap_or_default(),
                        title: sub.title.clone().unwrap_or_default(),
                        codec: sub.codec().to_string(),
                    },
                );
            }
            index += 1;
        }

        let file_name = file.map(FileInfo::file_name).unwrap_or("");
        let container = if file_name.is_empty() {
            "mkv"
        } else {
            file_name.rsplit('.').next().unwrap_or("mkv")
        };

        let has_compatible_audio = audios.iter().any(|a| is_browser_compatible(&a.codec_name));
        let needs_transcoding = !audios.is_empty() && !has_compatible_audio;

        let stream_url =
            format!("/Videos/{item_id}/stream?static=true&mediaSourceId={rendition}");

        let mut source = MediaSourceInfo {
            protocol: "Http".into(),
            id: rendition.to_string(),
            path: stream_url.clone(),
            source_type: "Default".into(),
            container: container.to_string(),
            name: display_name(videos.first().copied(), file),
            supports_transcoding: true,
            supports_direct_stream: !needs_transcoding,
            supports_direct_play: false,
            media_streams,
            direct_stream_url: stream_url,
            transcoding_url: format!("/Videos/{rendition}/hls/main.m3u8"),
            transcoding_container: "ts".into(),
            size: file.and_then(|f| f.size),
            bitrate: videos.first().and_then(|v| v.bps),
            ..Default::default()
        };
        if duration > 0.0 {
            source.run_time_ticks = Some(seconds_to_ticks(duration));
        }
        if !audios.is_empty() {
            source.default_audio_stream_index = Some(default_audio);
        }
        if needs_transcoding {
            source.transcoding_sub_protocol = Some("hls".into());
        }
        source
    }
}

fn is_browser_compatible(codec: &str) -> bool {
    BROWSER_COMPATIBLE_CODECS.contains(&codec.to_lowercase().as_str())
}

/// Jellyfin time unit: 100ns ticks.
#[must_use]
pub fn seconds_to_ticks(seconds: f64) -> i64 {
    (seconds * 10_000_000.0) as i64
}

#[must_use]
pub fn ticks_to_seconds(ticks: i64) -> f64 {
    ticks as f64 / 10_000_000.0
}

fn map_video_stream(vs: &VideoStream, index: i32) -> MediaStream {
    let codec = if vs.codec_name.is_empty() {
        "h264".to_string()
    } else {
        vs.codec_name.clone()
    };
    MediaStream {
        id: index.to_string(),
        codec,
        stream_type: "Video".into(),
        index,
        is_interlaced: !vs.progressive,
        is_default: true,
        display_title: video_display_title(vs),
        bit_rate: vs.bps,
        bit_depth: vs.bit_depth,
        ref_frames: vs.refs,
        height: Some(vs.height),
        width: Some(vs.width),
        average_frame_rate: parse_frame_rate(&vs.avg_frame_rate),
        real_frame_rate: parse_frame_rate(&vs.r_frame_rate),
        profile: vs.profile.clone(),
        level: vs.level,
        aspect_ratio: vs.display_aspect_ratio.clone(),
        pixel_format: vs.pix_fmt.clone(),
        color_space: vs.color_space.clone(),
        color_transfer: vs.color_transfer.clone(),
        color_primaries: vs.color_primaries.clone(),
        ..Default::default()
    }
}

fn map_audio_stream(audio: &AudioStream, index: i32) -> MediaStream {
    let codec = if audio.codec_name.is_empty() {
        "aac".to_string()
    } else {
        audio.codec_name.clone()
    };
    MediaStream {
        id: index.to_string(),
        codec,
        stream_type: "Audio".into(),
        index,
        is_default: audio.is_default,
        display_title: audio_display_title(audio),
        language: audio.language.clone(),
        display_language: audio.language.clone(),
        title: audio.title.clone(),
        bit_rate: audio.bps,
        channel_layout: audio.channel_layout.clone(),
        channels: audio.channels,
        sample_rate: audio
            .sample_rate
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok()),
        profile: audio.profile.clone(),
        ..Default::default()
    }
}

fn map_subtitle_stream(sub: &SubtitleStream, index: i32) -> MediaStream {
    let is_text = !sub.is_bitmap;
    let title = sub.title.clone().filter(|t| !t.is_empty());
    let language = sub.language.clone().filter(|l| !l.is_empty());
    let display = title
        .clone()
        .or_else(|| language.clone())
        .unwrap_or_else(|| format!("Subtitle {index}"));
    MediaStream {
        id: index.to_string(),
        codec: sub.codec().to_string(),
        stream_type: "Subtitle".into(),
        index,
        is_default: sub.is_default,
        is_forced: sub.forced,
        is_external: true,
        display_title: display,
        language,
        title,
        is_text_subtitle_stream: Some(is_text),
        supports_external_stream: Some(is_text),
        ..Default::default()
    }
}

/// "24000/1001" parses to 23.976.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    if rate.is_empty() {
        return None;
    }
    if let Some((num, den)) = rate.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some((num / den * 1000.0).round() / 1000.0);
        }
    }
    rate.parse().ok()
}

fn video_display_title(vs: &VideoStream) -> String {
    let mut parts = Vec::new();
    match vs.resolution_type.as_deref().filter(|r| !r.is_empty()) {
        Some(rt) => parts.push(rt.to_string()),
        None if vs.height > 0 => parts.push(format!("{}p", vs.height)),
        None => {}
    }
    if !vs.codec_name.is_empty() {
        parts.push(vs.codec_name.to_uppercase());
    }
    if let Some(cr) = vs.color_range_type.as_deref() {
        if cr != "SDR" && !cr.is_empty() {
            parts.push(cr.to_string());
        }
    }
    if parts.is_empty() {
        "Video".into()
    } else {
        parts.join(" ")
    }
}

fn audio_display_title(audio: &AudioStream) -> String {
    if let Some(title) = audio.title.as_deref().filter(|t| !t.is_empty()) {
        return title.to_string();
    }
    let mut parts = Vec::new();
    if let Some(lang) = audio.language.as_deref().filter(|l| !l.is_empty()) {
        parts.push(lang.to_string());
    }
    if !audio.codec_name.is_empty() {
        parts.push(audio.codec_name.to_uppercase());
    }
    if let Some(layout) = audio.channel_layout.as_deref().filter(|l| !l.is_empty()) {
        parts.push(layout.to_string());
    }
    if parts.is_empty() {
        "Audio".into()
    } else {
        parts.join(" ")
    }
}

fn display_name(video: Option<&VideoStream>, file: Option<&FileInfo>) -> String {
    let with_size = |mut name: String| {
        if let Some(size) = file.and_then(|f| f.size) {
            let size_mb = size / 1024 / 1024;
            if size_mb > 1024 {
                name = format!("{name} ({:.1}GB)", size_mb as f64 / 1024.0);
            } else {
                name = format!("{name} ({size_mb}MB)");
            }
        }
        name
    };
    match video {
        Some(vs) if !vs.codec_name.is_empty() || vs.height > 0 => {
            with_size(video_display_title(vs))
        }
        // Cloud files sometimes probe with empty video metadata.
        _ => with_size("Remote file".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(media_guid: &str, height: i64, codec: &str) -> VideoStream {
        VideoStream {
            guid: format!("v-{media_guid}"),
            media_guid: media_guid.into(),
            codec_name: codec.into(),
            height,
            width: height * 16 / 9,
            bps: Some(4_000_000),
            progressive: true,
            avg_frame_rate: "24000/1001".into(),
            ..Default::default()
        }
    }

    fn audio(media_guid: &str, codec: &str) -> AudioStream {
        AudioStream {
            guid: format!("a-{media_guid}-{codec}"),
            media_guid: media_guid.into(),
            codec_name: codec.into(),
            channels: Some(6),
            ..Default::default()
        }
    }

    fn external_sub(media_guid: &str, lang: &str) -> SubtitleStream {
        SubtitleStream {
            guid: format!("s-{media_guid}-{lang}"),
            media_guid: media_guid.into(),
            language: Some(lang.into()),
            format: Some("srt".into()),
            is_external: true,
            index: Some(9),
            ..Default::default()
        }
    }

    fn file(guid: &str, name: &str) -> FileInfo {
        FileInfo {
            guid: guid.into(),
            path: format!("/vol1/media/{name}"),
            size: Some(3 * 1024 * 1024 * 1024),
        }
    }

    #[test]
    fn sources_sort_best_resolution_first() {
        let resolver = RenditionResolver::new();
        let streams = StreamList {
            files: vec![file("m720", "a.mp4"), file("m2160", "b.mkv")],
            video_streams: vec![video("m720", 720, "h264"), video("m2160", 2160, "hevc")],
            audio_streams: vec![audio("m720", "aac"), audio("m2160", "aac")],
            subtitle_streams: vec![],
        };
        let sources = resolver.build_sources("item-1", &streams, 6200.0);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, "m2160");
        assert_eq!(sources[1].id, "m720");
        assert_eq!(sources[0].container, "mkv");
        assert_eq!(sources[1].container, "mp4");
        assert_eq!(
            sources[0].path,
            "/Videos/item-1/stream?static=true&mediaSourceId=m2160"
        );
        assert_eq!(sources[0].transcoding_url, "/Videos/m2160/hls/main.m3u8");
        assert_eq!(sources[0].run_time_ticks, Some(62_000_000_000));
    }

    #[test]
    fn stream_indices_are_contiguous_per_source() {
        let resolver = RenditionResolver::new();
        let streams = StreamList {
            files: vec![file("m1", "a.mkv")],
            video_streams: vec![video("m1", 1080, "h264")],
            audio_streams: vec![audio("m1", "dts"), audio("m1", "aac")],
            subtitle_streams: vec![external_sub("m1", "eng")],
        };
        let sources = resolver.build_sources("item-1", &streams, 0.0);
        let indices: Vec<i32> = sources[0].media_streams.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(sources[0].media_streams[0].stream_type, "Video");
        assert_eq!(sources[0].media_streams[3].stream_type, "Subtitle");
        // first compatible track wins the default slot
        assert_eq!(sources[0].default_audio_stream_index, Some(2));
    }

    #[test]
    fn incompatible_audio_disables_direct_stream() {
        let resolver = RenditionResolver::new();
        let streams = StreamList {
            files: vec![file("m1", "a.mkv")],
            video_streams: vec![video("m1", 1080, "h264")],
            audio_streams: vec![audio("m1", "dts"), audio("m1", "truehd")],
            subtitle_streams: vec![],
        };
        let sources = resolver.build_sources("item-1", &streams, 0.0);
        assert!(!sources[0].supports_direct_stream);
        assert!(sources[0].supports_transcoding);
        assert!(!sources[0].supports_direct_play);
        assert_eq!(sources[0].transcoding_sub_protocol.as_deref(), Some("hls"));
        // falls back to the first track
        assert_eq!(sources[0].default_audio_stream_index, Some(1));
    }

    #[test]
    fn embedded_subtitles_are_skipped() {
        let resolver = RenditionResolver::new();
        let mut embedded = external_sub("m1", "chi");
        embedded.is_external = false;
        let streams = StreamList {
            files: vec![file("m1", "a.mkv")],
            video_streams: vec![video("m1", 1080, "h264")],
            audio_streams: vec![audio("m1", "aac")],
            subtitle_streams: vec![embedded, external_sub("m1", "eng")],
        };
        let sources = resolver.build_sources("item-1", &streams, 0.0);
        let subs: Vec<&MediaStream> = sources[0]
            .media_streams
            .iter()
            .filter(|s| s.stream_type == "Subtitle")
            .collect();
        assert_eq!(subs.len(), 1);
        assert_eq!(
            subs[0].delivery_url.as_deref(),
            Some("/Videos/m1/m1/Subtitles/2/Stream.vtt")
        );

        let info = resolver.subtitle_info("m1", 2).unwrap();
        assert_eq!(info.guid, "s-m1-eng");
        assert_eq!(info.backend_index, 9);
        assert_eq!(info.codec, "srt");
    }

    #[test]
    fn missing_video_metadata_still_yields_a_source() {
        let resolver = RenditionResolver::new();
        let streams = StreamList {
            files: vec![file("m1", "remote.mkv")],
            video_streams: vec![],
            audio_streams: vec![],
            subtitle_streams: vec![],
        };
        let sources = resolver.build_sources("item-1", &streams, 0.0);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, "m1");
        assert!(sources[0].name.starts_with("Remote file"));
        assert!(sources[0].default_audio_stream_index.is_none());
    }

    #[test]
    fn display_titles_prefer_resolution_type() {
        let mut vs = video("m1", 2160, "hevc");
        vs.resolution_type = Some("4K".into());
        vs.color_range_type = Some("HDR10".into());
        assert_eq!(video_display_title(&vs), "4K HEVC HDR10");

        let plain = video("m1", 1080, "h264");
        assert_eq!(video_display_title(&plain), "1080p H264");
    }

    #[test]
    fn frame_rate_parses_fractions() {
        assert_eq!(parse_frame_rate("24000/1001"), Some(23.976));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate(""), None);
        assert_eq!(parse_frame_rate("x/y"), None);
    }
}
