//! Line-level handling of the live media playlist.
//!
//! The playlist is never parsed as a whole. Each poll is diffed against the
//! previous one and only the newly published lines are scanned for segments.

use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use tracing::debug;

use crate::error::{CaptureError, Result};

/// How many seconds of audio the playlist currently exposes
pub const AVAILABLE_DURATION_DIRECTIVE: &str = "#EXT-X-COM-TUNEIN-AVAIL-DUR:";
/// Wall-clock start of the segment whose URL follows
pub const PROGRAM_DATE_TIME_DIRECTIVE: &str = "#EXT-X-PROGRAM-DATE-TIME:";
pub const AD_EVENT_START: &str = r#"EVENT="START""#;
pub const AD_EVENT_END: &str = r#"EVENT="END""#;
pub const SEGMENT_URL_PREFIX: &str = "http";

const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A discovered piece of audio, ready to be downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub timestamp: DateTime<FixedOffset>,
    pub url: String,
}

/// Splits a playlist body into owned lines, dropping blank ones
#[must_use]
pub fn snapshot_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Reads the available-duration hint (in seconds) out of a playlist.
///
/// Returns `None` when the directive is missing or its value is not a positive number.
#[must_use]
pub fn available_duration<S: AsRef<str>>(lines: &[S]) -> Option<f64> {
    let value = lines
        .iter()
        .find_map(|l| l.as_ref().trim().strip_prefix(AVAILABLE_DURATION_DIRECTIVE))?;

    match value.trim().parse::<f64>() {
        Ok(d) if d.is_finite() && d > 0.0 => Some(d),
        _ => {
            debug!("{}", CaptureError::Parse {
                what: "available duration",
                value: value.to_string(),
            });
            None
        }
    }
}

/// Next poll happens at 4/5 of the visible window so that nothing expires unseen
#[must_use]
pub fn next_poll_interval(available_duration: Option<f64>, default: Duration) -> Duration {
    available_duration
        .and_then(|d| Duration::try_from_secs_f64(d * 4.0 / 5.0).ok())
        .map_or(default, |d| d.max(MIN_POLL_INTERVAL))
}

/// Parses the value of a `#EXT-X-PROGRAM-DATE-TIME` directive, keeping its offset
///
/// # Errors
/// Errors when the value is neither RFC 3339 nor ISO 8601 with a numeric offset
pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map_err(|_| CaptureError::Parse {
            what: "program date time",
            value: value.to_string(),
        })
}

/// Returns the lines of `current` that are not part of `previous`, in `current` order.
///
/// This is a sequence diff (longest common subsequence) rather than a set
/// difference: an identical line appended again later, such as a repeated ad
/// marker, is reported as added.
#[must_use]
pub fn added_lines<'a>(previous: &[String], current: &'a [String]) -> Vec<&'a str> {
    let prefix = previous
        .iter()
        .zip(current)
        .take_while(|(p, c)| p == c)
        .count();
    let previous = &previous[prefix..];
    let current = &current[prefix..];

    if previous.is_empty() {
        return current.iter().map(String::as_str).collect();
    }

    // lcs[i * width + j] = LCS length of previous[i..] and current[j..]
    let (n, m) = (previous.len(), current.len());
    let width = m + 1;
    let mut lcs = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if previous[i] == current[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let mut added = Vec::new();
    let (mut i, mut j) = (0, 0);
    while j < m {
        if i < n && previous[i] == current[j] {
            i += 1;
            j += 1;
        } else if i < n && lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            // On ties skip the old line, so lines of `current` match as early as possible
            // and a repeated trailing line is the one reported as new
            i += 1;
        } else {
            added.push(current[j].as_str());
            j += 1;
        }
    }

    added
}

/// Turns freshly added playlist lines into complete segments.
///
/// The ad-window flag lives here and survives between batches since an ad
/// break may span several polls. A timestamp waiting for its URL does not.
#[derive(Debug, Default)]
pub struct SegmentAssembler {
    in_ad_window: bool,
}

impl SegmentAssembler {
    #[must_use]
    pub const fn in_ad_window(&self) -> bool {
        self.in_ad_window
    }

    pub fn assemble<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut pending: Option<DateTime<FixedOffset>> = None;

        for line in lines {
            let line = line.trim();

            if line.contains(AD_EVENT_START) {
                debug!("Ad window started");
                self.in_ad_window = true;
                pending = None;
            }
            if line.contains(AD_EVENT_END) {
                debug!("Ad window ended");
                self.in_ad_window = false;
            }
            if self.in_ad_window {
                continue;
            }

            if let Some(value) = line.strip_prefix(PROGRAM_DATE_TIME_DIRECTIVE) {
                if let Some(orphan) = pending.take() {
                    debug!("Dropping timestamp {orphan} without a segment URL");
                }
                match parse_timestamp(value) {
                    Ok(timestamp) => pending = Some(timestamp),
                    Err(e) => debug!("{e}"),
                }
            } else if line.starts_with(SEGMENT_URL_PREFIX) {
                if let Some(timestamp) = pending.take() {
                    segments.push(Segment {
                        timestamp,
                        url: line.to_string(),
                    });
                }
            }
        }

        if let Some(orphan) = pending {
            debug!("Timestamp {orphan} has no segment URL in this batch, dropping it");
        }

        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        snapshot_lines(text)
    }

    #[test]
    fn duration_hint_sizes_poll_interval() {
        let with_hint = lines("#EXTM3U\n#EXT-X-COM-TUNEIN-AVAIL-DUR:60\n");
        let without_hint = lines("#EXTM3U\n#EXT-X-TARGETDURATION:10\n");
        let default = Duration::from_secs(120);

        assert_eq!(available_duration(&with_hint), Some(60.0));
        assert_eq!(
            next_poll_interval(available_duration(&with_hint), default),
            Duration::from_secs(48)
        );
        assert_eq!(available_duration(&without_hint), None);
        assert_eq!(
            next_poll_interval(available_duration(&without_hint), default),
            default
        );
    }

    #[test]
    fn garbage_duration_falls_back_to_default() {
        let broken = lines("#EXT-X-COM-TUNEIN-AVAIL-DUR:soon");
        let negative = lines("#EXT-X-COM-TUNEIN-AVAIL-DUR:-5");

        assert_eq!(available_duration(&broken), None);
        assert_eq!(available_duration(&negative), None);
    }

    #[test]
    fn oversized_duration_falls_back_to_default() {
        let huge = lines("#EXT-X-COM-TUNEIN-AVAIL-DUR:1e30");
        let default = Duration::from_secs(120);

        assert_eq!(next_poll_interval(available_duration(&huge), default), default);
    }

    #[test]
    fn timestamps_keep_their_offset() {
        let utc = parse_timestamp("2024-01-01T00:58:00Z").unwrap();
        let compact = parse_timestamp("2024-01-01T00:58:00.000+0000").unwrap();
        let eastern = parse_timestamp("2024-01-01T00:58:00-05:00").unwrap();

        assert_eq!(utc, compact);
        assert_eq!(eastern.offset().local_minus_utc(), -5 * 3600);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn diff_returns_only_new_lines_in_order() {
        let previous = lines("#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:1\na\nb\nc\n");
        let current = lines("#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:2\nb\nc\nd\ne\n");

        assert_eq!(
            added_lines(&previous, &current),
            vec!["#EXT-X-MEDIA-SEQUENCE:2", "d", "e"]
        );
    }

    #[test]
    fn diff_against_empty_snapshot_is_everything() {
        let current = lines("a\nb\n");
        assert_eq!(added_lines(&[], &current), vec!["a", "b"]);
        assert!(added_lines(&current, &current).is_empty());
    }

    #[test]
    fn diff_reports_repeated_marker_appended_later() {
        let start = r#"#EXT-X-CUE:X-TUNEIN-AD-EVENT="START""#;
        let previous = lines(&format!("{start}\nx\n"));
        let current = lines(&format!("{start}\nx\n{start}\ny\n"));

        assert_eq!(added_lines(&previous, &current), vec![start, "y"]);
    }

    #[test]
    fn diff_reports_new_trailing_marker_when_window_slides() {
        let start = r#"#EXT-X-CUE:X-TUNEIN-AD-EVENT="START""#;
        let end = r#"#EXT-X-CUE:X-TUNEIN-AD-EVENT="END""#;
        let previous = lines(&format!(
            "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:1\nts1\nhttps://cdn.example/1.aac\n\
             {start}\nts2\nhttps://cdn.example/ad1.aac\n{end}\n"
        ));
        let current = lines(&format!(
            "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:2\n{start}\nts2\nhttps://cdn.example/ad1.aac\n{end}\n\
             ts3\nhttps://cdn.example/2.aac\n{start}\nts4\nhttps://cdn.example/ad2.aac\n{end}\n"
        ));

        assert_eq!(
            added_lines(&previous, &current),
            vec![
                "#EXT-X-MEDIA-SEQUENCE:2",
                "ts3",
                "https://cdn.example/2.aac",
                start,
                "ts4",
                "https://cdn.example/ad2.aac",
                end,
            ]
        );
    }

    #[test]
    fn ad_window_closes_when_both_polls_end_in_end_marker() {
        let start = r#"#EXT-X-CUE:X-TUNEIN-AD-EVENT="START""#;
        let end = r#"#EXT-X-CUE:X-TUNEIN-AD-EVENT="END""#;
        let first = lines(&format!(
            "#EXTM3U\n#EXT-X-PROGRAM-DATE-TIME:2024-01-01T01:00:00Z\nhttps://cdn.example/1.aac\n\
             {start}\n#EXT-X-PROGRAM-DATE-TIME:2024-01-01T01:00:10Z\nhttps://cdn.example/ad1.aac\n{end}\n"
        ));
        let second = lines(&format!(
            "#EXTM3U\n{start}\n#EXT-X-PROGRAM-DATE-TIME:2024-01-01T01:00:10Z\nhttps://cdn.example/ad1.aac\n{end}\n\
             #EXT-X-PROGRAM-DATE-TIME:2024-01-01T01:00:20Z\nhttps://cdn.example/2.aac\n\
             {start}\n#EXT-X-PROGRAM-DATE-TIME:2024-01-01T01:00:30Z\nhttps://cdn.example/ad2.aac\n{end}\n"
        ));
        let third = lines(&format!(
            "#EXTM3U\n#EXT-X-PROGRAM-DATE-TIME:2024-01-01T01:00:20Z\nhttps://cdn.example/2.aac\n\
             {start}\n#EXT-X-PROGRAM-DATE-TIME:2024-01-01T01:00:30Z\nhttps://cdn.example/ad2.aac\n{end}\n\
             #EXT-X-PROGRAM-DATE-TIME:2024-01-01T01:00:40Z\nhttps://cdn.example/3.aac\n"
        ));

        let mut assembler = SegmentAssembler::default();
        let urls = |segments: Vec<Segment>| -> Vec<String> {
            segments.into_iter().map(|s| s.url).collect()
        };

        assert_eq!(
            urls(assembler.assemble(added_lines(&[], &first))),
            ["https://cdn.example/1.aac"]
        );
        assert_eq!(
            urls(assembler.assemble(added_lines(&first, &second))),
            ["https://cdn.example/2.aac"]
        );
        assert!(!assembler.in_ad_window());
        assert_eq!(
            urls(assembler.assemble(added_lines(&second, &third))),
            ["https://cdn.example/3.aac"]
        );
    }

    #[test]
    fn assembles_timestamp_url_pairs() {
        let mut assembler = SegmentAssembler::default();
        let segments = assembler.assemble([
            "#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:58:00Z",
            "#EXTINF:10,",
            "https://cdn.example/a.aac",
            "#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:58:10Z",
            "https://cdn.example/b.aac",
        ]);

        let urls: Vec<_> = segments.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, ["https://cdn.example/a.aac", "https://cdn.example/b.aac"]);
    }

    #[test]
    fn timestamp_without_url_is_dropped() {
        let mut assembler = SegmentAssembler::default();
        let segments = assembler.assemble([
            "#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:58:00Z",
            "#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:58:10Z",
            "https://cdn.example/b.aac",
            "#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:58:20Z",
        ]);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].timestamp, parse_timestamp("2024-01-01T00:58:10Z").unwrap());

        // The trailing timestamp does not pair with a URL from the next batch
        let next = assembler.assemble(["https://cdn.example/c.aac"]);
        assert!(next.is_empty());
    }

    #[test]
    fn url_without_timestamp_is_ignored() {
        let mut assembler = SegmentAssembler::default();
        assert!(assembler.assemble(["https://cdn.example/a.aac"]).is_empty());
    }

    #[test]
    fn nothing_inside_ad_window_is_assembled() {
        let start = r#"#EXT-X-CUE:X-TUNEIN-AD-EVENT="START""#;
        let end = r#"#EXT-X-CUE:X-TUNEIN-AD-EVENT="END""#;
        let mut assembler = SegmentAssembler::default();

        let segments = assembler.assemble([
            "#EXT-X-PROGRAM-DATE-TIME:2024-01-01T01:00:00Z",
            start,
            "https://cdn.example/straddles.aac",
            "#EXT-X-PROGRAM-DATE-TIME:2024-01-01T01:00:10Z",
            "https://cdn.example/ad.aac",
            end,
            "https://cdn.example/after-end-no-timestamp.aac",
            "#EXT-X-PROGRAM-DATE-TIME:2024-01-01T01:00:20Z",
            "https://cdn.example/program.aac",
        ]);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].url, "https://cdn.example/program.aac");
        assert!(!assembler.in_ad_window());
    }

    #[test]
    fn ad_window_spans_batches() {
        let mut assembler = SegmentAssembler::default();
        assert!(
            assembler
                .assemble([r#"#EXT-X-CUE:EVENT="START""#])
                .is_empty()
        );
        assert!(assembler.in_ad_window());

        let during = assembler.assemble([
            "#EXT-X-PROGRAM-DATE-TIME:2024-01-01T01:05:00Z",
            "https://cdn.example/ad.aac",
        ]);
        assert!(during.is_empty());

        let after = assembler.assemble([
            r#"#EXT-X-CUE:EVENT="END""#,
            "#EXT-X-PROGRAM-DATE-TIME:2024-01-01T01:10:00Z",
            "https://cdn.example/program.aac",
        ]);
        assert_eq!(after.len(), 1);
    }
}
