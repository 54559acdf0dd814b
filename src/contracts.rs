//! # Wire Contracts
//!
//! Data records exchanged with clients and collaborators: audio frames,
//! interim/final transcripts, question-generation options and results.
//! Audio frames travel as binary WebSocket messages with a fixed little-endian
//! header; everything else is JSON.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// A single PCM16 audio frame delivered from the client.
///
/// ## Wire Format (binary WebSocket message):
/// - bytes 0..4: `u32` sequence (little-endian, client-assigned, monotonic)
/// - bytes 4..12: `f64` timestamp in ms since client session start
/// - bytes 12..: raw PCM16 mono payload (~20-40ms of audio)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Sequential number supplied by the client
    pub sequence: u32,

    /// Client-side timestamp (milliseconds since session start)
    pub timestamp: f64,

    /// Raw PCM16 mono bytes
    pub payload: Vec<u8>,
}

impl AudioFrame {
    /// Size of the binary header preceding the PCM payload.
    pub const HEADER_BYTES: usize = 12;

    /// Decode a frame from a binary WebSocket message.
    pub fn from_wire(data: &[u8]) -> Result<Self, String> {
        if data.len() < Self::HEADER_BYTES {
            return Err(format!(
                "Audio frame too short: {} bytes (need at least {})",
                data.len(),
                Self::HEADER_BYTES
            ));
        }

        let mut cursor = Cursor::new(data);
        let sequence = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| format!("Failed to read sequence: {}", e))?;
        let timestamp = cursor
            .read_f64::<LittleEndian>()
            .map_err(|e| format!("Failed to read timestamp: {}", e))?;

        Ok(Self {
            sequence,
            timestamp,
            payload: data[Self::HEADER_BYTES..].to_vec(),
        })
    }

    /// Encode a frame into its binary wire representation.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_BYTES + self.payload.len());
        out.write_u32::<LittleEndian>(self.sequence)
            .expect("writing to Vec cannot fail");
        out.write_f64::<LittleEndian>(self.timestamp)
            .expect("writing to Vec cannot fail");
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Interim transcript chunk emitted while the user is still speaking.
/// Subject to revision; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialTranscript {
    pub text: String,

    /// Utterance offset reported by the recognition engine (ms)
    pub offset_ms: i64,

    /// Utterance duration reported by the recognition engine (ms)
    pub duration_ms: i64,
}

/// Finalized transcript chunk emitted once the engine confirms the utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalTranscript {
    pub text: String,
    pub offset_ms: i64,
    pub duration_ms: i64,

    /// Facts extracted alongside the utterance, when the engine supplies them
    pub facts: Option<Vec<String>>,
}

/// Options supplied when the client requests question generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateQuestionsOptions {
    pub topic: Option<String>,
    pub preferred_style: Option<String>,
    #[serde(default)]
    pub force_refresh: bool,
}

/// Question item returned to the client, from either remote generation
/// or the deterministic fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionItem {
    pub text: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub novelty: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_frame_wire_roundtrip() {
        let frame = AudioFrame {
            sequence: 42,
            timestamp: 1337.5,
            payload: vec![1, 2, 3, 4],
        };

        let wire = frame.to_wire();
        assert_eq!(wire.len(), AudioFrame::HEADER_BYTES + 4);

        let decoded = AudioFrame::from_wire(&wire).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_audio_frame_rejects_short_message() {
        let err = AudioFrame::from_wire(&[0u8; 5]).unwrap_err();
        assert!(err.contains("too short"));
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let frame = AudioFrame {
            sequence: 0,
            timestamp: 0.0,
            payload: Vec::new(),
        };
        let decoded = AudioFrame::from_wire(&frame.to_wire()).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_question_item_omits_absent_fields() {
        let item = QuestionItem {
            text: "What is next?".to_string(),
            tags: None,
            confidence: None,
            novelty: None,
        };
        let json = serde_json::to_string(&item).unwrap();
        assert!(!json.contains("tags"));
        assert!(!json.contains("confidence"));
        assert!(!json.contains("novelty"));
    }
}
