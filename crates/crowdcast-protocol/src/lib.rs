//! Wire types for the crowdcast streams.
//!
//! Everything that moves on a stream is a single `data` field of UTF-8 JSON.
//! The types here are the canonical shapes; [`validate`] is the seam where
//! payloads earn their way into the system.

pub mod message;
pub mod stream;
pub mod validate;

pub use message::{ChatMessage, Moderation, ModerationAction, Origin, Trace};
pub use stream::{
    ObservationTrace, SafetyFlags, StreamFrame, StreamObservation, StreamTranscriptSegment,
};
pub use validate::ProtocolError;

pub const CHAT_MESSAGE_SCHEMA: &str = "ChatMessage";
pub const STREAM_FRAME_SCHEMA: &str = "StreamFrame";
pub const STREAM_TRANSCRIPT_SCHEMA: &str = "StreamTranscriptSegment";
pub const STREAM_OBSERVATION_SCHEMA: &str = "StreamObservation";
pub const SCHEMA_VERSION: &str = "1.0.0";
