//! HLS session engine for incrementally produced audio.
//!
//! Audio arrives as chunks from a synthesis stream. Each session turns them
//! into numbered media segments plus an EVENT playlist that clients can start
//! playing before synthesis finishes.
//!
//! ```text
//! chunks ──> SegmentBuffer ──> SegmentWriter ──> PlaylistManager
//!               (cut)          (write+probe)     (ordered append)
//! ```
//!
//! The [`SessionRegistry`] owns every live session; [`spawn_janitor`] expires
//! old ones in the background.

pub mod buffer;
pub mod config;
pub mod error;
pub mod playlist;
pub mod probe;
pub mod registry;
pub mod session;
pub mod writer;

pub use config::{
    HlsSettings, SegmentFormat, SessionOptions, DEFAULT_BYTES_PER_SECOND,
    DEFAULT_MAX_CHUNKS_PER_SEGMENT,
};
pub use error::{HlsError, Result};
pub use probe::{DurationProbe, FfprobeProbe, ProbeError};
pub use registry::{spawn_janitor, Clock, JanitorConfig, ManualClock, SessionRegistry, SystemClock};
pub use session::{
    segment_mime_type, validate_segment_name, FirstSegment, HlsSession, SessionState,
    PLAYLIST_MIME_TYPE,
};
