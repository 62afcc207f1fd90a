//! HLS playlist text manipulation.
//!
//! The backend's transcoder emits a media playlist but no subtitle track,
//! so the bridge injects one pointing at a synthesized companion playlist
//! whose segment names mirror the video segments with a `.vtt` extension.

/// Subtitle group id used by the injected track and the variant streams.
const SUBTITLE_GROUP: &str = "subs";

/// Inject a subtitle-track reference right after the playlist header. The
/// track URI points at `subtitle_uri`, and any variant-stream lines are
/// tagged with the subtitle group so players associate the two.
#[must_use]
pub fn inject_subtitle_track(master: &str, subtitle_uri: &str) -> String {
    let media_line = format!(
        "#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"{SUBTITLE_GROUP}\",NAME=\"Subtitle\",DEFAULT=YES,AUTOSELECT=YES,FORCED=NO,URI=\"{subtitle_uri}\""
    );

    let mut output = String::with_capacity(master.len() + media_line.len() + 64);
    let mut injected = false;
    for line in master.lines() {
        if line.starts_with("#EXT-X-STREAM-INF") && !line.contains("SUBTITLES=") {
            output.push_str(line);
            output.push_str(&format!(",SUBTITLES=\"{SUBTITLE_GROUP}\""));
        } else {
            output.push_str(line);
        }
        output.push('\n');
        if !injected && line.trim() == "#EXTM3U" {
            output.push_str(&media_line);
            output.push('\n');
            injected = true;
        }
    }
    // header missing entirely: prepend rather than drop the track
    if !injected {
        return format!("{media_line}\n{output}");
    }
    output
}

/// Derive the subtitle playlist from the backend's master playlist by
/// rewriting every segment line's extension to `.vtt`. Tag lines pass
/// through unchanged so timing metadata stays intact.
#[must_use]
pub fn to_subtitle_playlist(master: &str) -> String {
    let mut output = String::with_capacity(master.len());
    for line in master.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            output.push_str(line);
        } else {
            match trimmed.rsplit_once('.') {
                Some((stem, _ext)) => output.push_str(&format!("{stem}.vtt")),
                None => output.push_str(line),
            }
        }
        output.push('\n');
    }
    output
}
