// Playlist manager
//
// Maintains the append-only EVENT playlist of a session on disk:
//
//   #EXTM3U
//   #EXT-X-VERSION:3
//   #EXT-X-TARGETDURATION:5
//   #EXT-X-PLAYLIST-TYPE:EVENT
//   #EXT-X-MEDIA-SEQUENCE:0
//   #EXTINF:4.128,
//   segment001.mp3
//   #EXT-X-ENDLIST
//
// Every mutation rewrites the file through a temp file + rename so readers
// never observe a half-written playlist. Callers serialize mutations per
// session.

use crate::config::target_duration_for;
use std::path::{Path, PathBuf};

pub const PLAYLIST_FILENAME: &str = "playlist.m3u8";
pub const PLAYLIST_VERSION: u32 = 3;

const EXTINF: &str = "#EXTINF:";
const TARGET_DURATION: &str = "#EXT-X-TARGETDURATION:";
const ENDLIST: &str = "#EXT-X-ENDLIST";

/// Render the header of a fresh playlist.
#[must_use]
pub fn render_header(target_duration: u64) -> String {
    format!(
        "#EXTM3U\n\
         #EXT-X-VERSION:{PLAYLIST_VERSION}\n\
         {TARGET_DURATION}{target_duration}\n\
         #EXT-X-PLAYLIST-TYPE:EVENT\n\
         #EXT-X-MEDIA-SEQUENCE:0\n"
    )
}

/// Number of `#EXTINF` entries in playlist text.
#[must_use]
pub fn count_entries(content: &str) -> usize {
    content.lines().filter(|line| line.starts_with(EXTINF)).count()
}

/// Whether playlist text ends with the completion marker.
#[must_use]
pub fn has_endlist(content: &str) -> bool {
    content
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .is_some_and(|line| line.trim() == ENDLIST)
}

/// Declared `#EXT-X-TARGETDURATION` of playlist text, if any.
#[must_use]
pub fn declared_target_duration(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix(TARGET_DURATION))
        .and_then(|value| value.trim().parse().ok())
}

/// Apply one segment append to playlist text.
///
/// Strips a trailing completion marker, raises the target duration when the
/// new segment needs it, appends the entry, and restores the marker.
fn append_entry(content: &str, filename: &str, duration: f64) -> (String, u64) {
    let mut lines: Vec<String> = content.lines().map(|l| l.trim_end().to_string()).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    let had_endlist = lines.last().is_some_and(|l| l == ENDLIST);
    if had_endlist {
        lines.pop();
    }

    let needed = target_duration_for(duration);
    let mut target = needed;
    for line in &mut lines {
        if let Some(value) = line.strip_prefix(TARGET_DURATION) {
            let current: u64 = value.trim().parse().unwrap_or(0);
            target = current.max(needed);
            if target != current {
                *line = format!("{TARGET_DURATION}{target}");
            }
        }
    }

    lines.push(format!("{EXTINF}{duration:.3},"));
    lines.push(filename.to_string());
    if had_endlist {
        lines.push(ENDLIST.to_string());
    }

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    (rendered, target)
}

/// Owner of one session's playlist file.
#[derive(Debug)]
pub struct PlaylistManager {
    path: PathBuf,
    entries: u64,
    target_duration: u64,
    finalized: bool,
}

impl PlaylistManager {
    /// Write the initial header-only playlist into `dir`.
    pub async fn initialize(dir: &Path, segment_duration: f64) -> std::io::Result<Self> {
        let path = dir.join(PLAYLIST_FILENAME);
        let target_duration = target_duration_for(segment_duration);
        write_atomic(&path, &render_header(target_duration)).await?;

        Ok(Self {
            path,
            entries: 0,
            target_duration,
            finalized: false,
        })
    }

    /// Append a `#EXTINF` entry for a segment that already exists on disk.
    pub async fn append_segment(&mut self, filename: &str, duration: f64) -> std::io::Result<()> {
        let current = tokio::fs::read_to_string(&self.path).await?;
        let (updated, target) = append_entry(&current, filename, duration);
        write_atomic(&self.path, &updated).await?;

        if target > self.target_duration {
            tracing::debug!(
                from = self.target_duration,
                to = target,
                "Raised playlist target duration"
            );
        }
        self.target_duration = target;
        self.entries += 1;
        Ok(())
    }

    /// Write the completion marker. Returns `false` if it was already present.
    pub async fn finalize(&mut self) -> std::io::Result<bool> {
        let current = tokio::fs::read_to_string(&self.path).await?;
        if has_endlist(&current) {
            self.finalized = true;
            return Ok(false);
        }

        let mut updated = current;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(ENDLIST);
        updated.push('\n');
        write_atomic(&self.path, &updated).await?;

        self.finalized = true;
        Ok(true)
    }

    pub async fn read(&self) -> std::io::Result<String> {
        tokio::fs::read_to_string(&self.path).await
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn entries(&self) -> u64 {
        self.entries
    }

    #[must_use]
    pub const fn target_duration(&self) -> u64 {
        self.target_duration
    }

    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }
}

async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("m3u8.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await
}
