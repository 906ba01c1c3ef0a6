//! Gesture Sensor Protocol
//!
//! UUIDs and payload codec for the two gesture peripherals (command and
//! instrument). Both expose a stroke characteristic and a prediction
//! characteristic; both only notify, the host never writes.

use crate::domain::errors::IngestError;
use crate::domain::models::{Point, PredictionResult, StrokeSegment, StrokeState};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Command device service UUID ("tinyml25" in ASCII around the role word)
pub const COMMAND_SERVICE_UUID: &str = "74696e79-6d6c-3235-1000-74696e796d6c";
pub const COMMAND_STROKE_UUID: &str = "74696e79-6d6c-3235-1001-74696e796d6c";
pub const COMMAND_PREDICTION_UUID: &str = "74696e79-6d6c-3235-1002-74696e796d6c";

/// Instrument device service UUID
pub const INSTRUMENT_SERVICE_UUID: &str = "74696e79-6d6c-3235-0000-74696e796d6c";
pub const INSTRUMENT_STROKE_UUID: &str = "74696e79-6d6c-3235-0001-74696e796d6c";
pub const INSTRUMENT_PREDICTION_UUID: &str = "74696e79-6d6c-3235-0002-74696e796d6c";

/// Size of one encoded point (x: Int32, y: Int32)
const POINT_SIZE: usize = 8;

/// Field types a characteristic payload is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Uint8,
    Int32,
    Float32,
    /// Int32 count followed by `count` (x: Int32, y: Int32) pairs
    StrokePoints,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Uint8(u8),
    Int32(i32),
    Float32(f32),
    StrokePoints(Vec<Point>),
}

impl FieldValue {
    fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Uint8(v) => Some(*v as i64),
            FieldValue::Int32(v) => Some(*v as i64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Pure decoder/encoder for characteristic payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadCodec {
    byte_order: ByteOrder,
}

impl PayloadCodec {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self { byte_order }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Decode `bytes` field by field according to `structures`.
    ///
    /// The buffer must be consumed exactly: short reads, negative or
    /// oversized point counts, and trailing bytes are all malformed.
    pub fn decode(
        &self,
        bytes: &[u8],
        structures: &[FieldKind],
    ) -> Result<Vec<FieldValue>, IngestError> {
        let mut reader = FieldReader {
            bytes,
            offset: 0,
            byte_order: self.byte_order,
        };

        let mut fields = Vec::with_capacity(structures.len());
        for kind in structures {
            let value = match kind {
                FieldKind::Uint8 => FieldValue::Uint8(reader.read_u8()?),
                FieldKind::Int32 => FieldValue::Int32(reader.read_i32()?),
                FieldKind::Float32 => FieldValue::Float32(reader.read_f32()?),
                FieldKind::StrokePoints => FieldValue::StrokePoints(reader.read_points()?),
            };
            fields.push(value);
        }

        if reader.remaining() != 0 {
            return Err(IngestError::malformed(format!(
                "{} trailing bytes after {} fields (payload is {} bytes)",
                reader.remaining(),
                structures.len(),
                bytes.len()
            )));
        }

        Ok(fields)
    }

    /// Inverse of [`PayloadCodec::decode`]
    pub fn encode(&self, fields: &[FieldValue]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for field in fields {
            match field {
                FieldValue::Uint8(v) => bytes.push(*v),
                FieldValue::Int32(v) => bytes.extend_from_slice(&self.i32_bytes(*v)),
                FieldValue::Float32(v) => bytes.extend_from_slice(&self.f32_bytes(*v)),
                FieldValue::StrokePoints(points) => {
                    bytes.extend_from_slice(&self.i32_bytes(points.len() as i32));
                    for point in points {
                        bytes.extend_from_slice(&self.i32_bytes(point.x.round() as i32));
                        bytes.extend_from_slice(&self.i32_bytes(point.y.round() as i32));
                    }
                }
            }
        }
        bytes
    }

    /// Decode a stroke notification.
    ///
    /// ```text
    /// [state]        : Uint8 or Int32 (0 = start, 1 = continue, 2 = end)
    /// [declared]     : optional Uint8 or Int32 point count
    /// [length]       : Int32 point count
    /// [length x 8]   : x: Int32, y: Int32
    /// ```
    ///
    /// Without a declared count the segment length is the `StrokePoints`
    /// prefix, which always matches the points read. A layout with a second
    /// integer field carries the device's own count, which may disagree.
    pub fn decode_stroke_segment(
        &self,
        bytes: &[u8],
        structures: &[FieldKind],
    ) -> Result<StrokeSegment, IngestError> {
        let fields = self.decode(bytes, structures)?;

        let mut integers = Vec::with_capacity(2);
        let mut points = None;
        for field in fields {
            match field {
                FieldValue::StrokePoints(p) if points.is_none() => points = Some(p),
                ref f if integers.len() < 2 && f.as_integer().is_some() => {
                    integers.extend(f.as_integer())
                }
                other => {
                    return Err(IngestError::malformed(format!(
                        "unexpected field in stroke payload: {:?}",
                        other
                    )))
                }
            }
        }

        let raw_state = *integers
            .first()
            .ok_or_else(|| IngestError::malformed("stroke payload has no state field"))?;
        let points =
            points.ok_or_else(|| IngestError::malformed("stroke payload has no point list"))?;
        let state = StrokeState::from_wire(raw_state).ok_or_else(|| {
            IngestError::malformed(format!("unrecognized stroke state {}", raw_state))
        })?;
        let length = match integers.get(1) {
            Some(declared) => u32::try_from(*declared).map_err(|_| {
                IngestError::malformed(format!("negative declared point count {}", declared))
            })?,
            None => points.len() as u32,
        };

        trace!(%state, length, points = points.len(), "stroke segment decoded");
        Ok(StrokeSegment {
            state,
            length,
            points,
        })
    }

    /// Decode a prediction notification: label index, then score.
    ///
    /// Float scores are used as-is; integer scores are divided by
    /// `score_divisor`. The result must land in `[0, 1]`.
    pub fn decode_prediction(
        &self,
        bytes: &[u8],
        structures: &[FieldKind],
        score_divisor: f32,
    ) -> Result<PredictionResult, IngestError> {
        let fields = self.decode(bytes, structures)?;
        if fields.len() != 2 {
            return Err(IngestError::malformed(format!(
                "prediction payload needs 2 fields, structure declares {}",
                fields.len()
            )));
        }

        let label_index = match fields[0] {
            FieldValue::Uint8(v) => v as i32,
            FieldValue::Int32(v) => v,
            ref other => {
                return Err(IngestError::malformed(format!(
                    "prediction label must be an integer, got {:?}",
                    other
                )))
            }
        };

        let score = match fields[1] {
            FieldValue::Float32(v) => v,
            FieldValue::Int32(v) => v as f32 / score_divisor,
            FieldValue::Uint8(v) => v as f32 / score_divisor,
            ref other => {
                return Err(IngestError::malformed(format!(
                    "prediction score must be numeric, got {:?}",
                    other
                )))
            }
        };

        if !(0.0..=1.0).contains(&score) {
            return Err(IngestError::malformed(format!(
                "prediction score {} outside [0, 1]",
                score
            )));
        }

        Ok(PredictionResult { label_index, score })
    }

    /// Build a stroke notification (replay and tests)
    pub fn encode_stroke_segment(
        &self,
        state: StrokeState,
        points: &[Point],
        structures: &[FieldKind],
    ) -> Vec<u8> {
        let wire_state = state.to_wire().unwrap_or(u8::MAX);
        let mut integers = 0;
        let fields: Vec<FieldValue> = structures
            .iter()
            .map(|kind| {
                // First integer is the state, a second one the declared count
                let value = if integers == 0 {
                    wire_state as i64
                } else {
                    points.len() as i64
                };
                match kind {
                    FieldKind::Uint8 => {
                        integers += 1;
                        FieldValue::Uint8(value as u8)
                    }
                    FieldKind::Int32 => {
                        integers += 1;
                        FieldValue::Int32(value as i32)
                    }
                    FieldKind::Float32 => FieldValue::Float32(wire_state as f32),
                    FieldKind::StrokePoints => FieldValue::StrokePoints(points.to_vec()),
                }
            })
            .collect();
        self.encode(&fields)
    }

    /// Build a prediction notification (replay and tests)
    pub fn encode_prediction(
        &self,
        prediction: &PredictionResult,
        structures: &[FieldKind],
        score_divisor: f32,
    ) -> Vec<u8> {
        let score_field = |kind: &FieldKind| match kind {
            FieldKind::Float32 => FieldValue::Float32(prediction.score),
            FieldKind::Uint8 => FieldValue::Uint8((prediction.score * score_divisor).round() as u8),
            _ => FieldValue::Int32((prediction.score * score_divisor).round() as i32),
        };
        let fields: Vec<FieldValue> = structures
            .iter()
            .enumerate()
            .map(|(i, kind)| match (i, kind) {
                (0, FieldKind::Uint8) => FieldValue::Uint8(prediction.label_index as u8),
                (0, _) => FieldValue::Int32(prediction.label_index),
                (_, kind) => score_field(kind),
            })
            .collect();
        self.encode(&fields)
    }

    fn i32_bytes(&self, value: i32) -> [u8; 4] {
        match self.byte_order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    fn f32_bytes(&self, value: f32) -> [u8; 4] {
        match self.byte_order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }
}

/// Cursor over a payload
struct FieldReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    byte_order: ByteOrder,
}

impl FieldReader<'_> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&[u8], IngestError> {
        if self.remaining() < len {
            return Err(IngestError::malformed(format!(
                "need {} bytes at offset {}, payload is {} bytes",
                len,
                self.offset,
                self.bytes.len()
            )));
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn take4(&mut self) -> Result<[u8; 4], IngestError> {
        let slice = self.take(4)?;
        Ok([slice[0], slice[1], slice[2], slice[3]])
    }

    fn read_u8(&mut self) -> Result<u8, IngestError> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32, IngestError> {
        let raw = self.take4()?;
        Ok(match self.byte_order {
            ByteOrder::Little => i32::from_le_bytes(raw),
            ByteOrder::Big => i32::from_be_bytes(raw),
        })
    }

    fn read_f32(&mut self) -> Result<f32, IngestError> {
        let raw = self.take4()?;
        Ok(match self.byte_order {
            ByteOrder::Little => f32::from_le_bytes(raw),
            ByteOrder::Big => f32::from_be_bytes(raw),
        })
    }

    fn read_points(&mut self) -> Result<Vec<Point>, IngestError> {
        let count = self.read_i32()?;
        let count = usize::try_from(count)
            .map_err(|_| IngestError::malformed(format!("negative point count {}", count)))?;

        let needed = count
            .checked_mul(POINT_SIZE)
            .filter(|needed| *needed <= self.remaining())
            .ok_or_else(|| {
                IngestError::malformed(format!(
                    "{} points would read past the end ({} bytes left)",
                    count,
                    self.remaining()
                ))
            })?;
        trace!(count, needed, "reading stroke points");

        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            let x = self.read_i32()?;
            let y = self.read_i32()?;
            points.push(Point::new(f64::from(x), f64::from(y)));
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const STROKE: [FieldKind; 2] = [FieldKind::Uint8, FieldKind::StrokePoints];
    const PREDICTION: [FieldKind; 2] = [FieldKind::Int32, FieldKind::Float32];

    fn points(n: i32) -> Vec<Point> {
        (0..n).map(|i| Point::new(i as f64 * 3.0, -i as f64)).collect()
    }

    #[test]
    fn test_stroke_layout_is_little_endian() {
        let codec = PayloadCodec::default();
        let bytes = codec.encode_stroke_segment(
            StrokeState::Continue,
            &[Point::new(1.0, -1.0)],
            &STROKE,
        );
        assert_eq!(
            bytes,
            vec![1, 1, 0, 0, 0, 1, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_stroke_round_trip_keeps_points() {
        let codec = PayloadCodec::default();
        let original = points(5);
        let bytes = codec.encode_stroke_segment(StrokeState::Start, &original, &STROKE);
        let segment = codec.decode_stroke_segment(&bytes, &STROKE).unwrap();
        assert_eq!(segment.state, StrokeState::Start);
        assert_eq!(segment.length, 5);
        assert_eq!(segment.points, original);
    }

    #[test]
    fn test_extreme_coordinates_survive_re_encoding() {
        let codec = PayloadCodec::default();
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&2i32.to_le_bytes());
        for v in [16_777_217i32, i32::MAX, i32::MIN, -16_777_219] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }

        let segment = codec.decode_stroke_segment(&bytes, &STROKE).unwrap();
        assert_eq!(segment.points[0], Point::new(16_777_217.0, f64::from(i32::MAX)));
        let encoded = codec.encode_stroke_segment(segment.state, &segment.points, &STROKE);
        assert_eq!(encoded, bytes);
    }

    #[test]
    fn test_declared_count_is_carried_separately() {
        let structures = [FieldKind::Uint8, FieldKind::Int32, FieldKind::StrokePoints];
        let codec = PayloadCodec::default();
        let bytes = codec.encode(&[
            FieldValue::Uint8(0),
            FieldValue::Int32(5),
            FieldValue::StrokePoints(points(3)),
        ]);
        let segment = codec.decode_stroke_segment(&bytes, &structures).unwrap();
        assert_eq!(segment.length, 5);
        assert_eq!(segment.points.len(), 3);

        let honest = codec.encode_stroke_segment(StrokeState::Continue, &points(4), &structures);
        let segment = codec.decode_stroke_segment(&honest, &structures).unwrap();
        assert_eq!(segment.state, StrokeState::Continue);
        assert_eq!(segment.length, 4);

        let negative = codec.encode(&[
            FieldValue::Uint8(0),
            FieldValue::Int32(-1),
            FieldValue::StrokePoints(points(1)),
        ]);
        assert!(matches!(
            codec.decode_stroke_segment(&negative, &structures),
            Err(IngestError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_int32_state_and_big_endian() {
        let structures = [FieldKind::Int32, FieldKind::StrokePoints];
        let codec = PayloadCodec::new(ByteOrder::Big);
        let bytes = codec.encode_stroke_segment(StrokeState::End, &points(2), &structures);
        assert_eq!(&bytes[..4], &[0, 0, 0, 2]);
        let segment = codec.decode_stroke_segment(&bytes, &structures).unwrap();
        assert_eq!(segment.state, StrokeState::End);
        assert_eq!(segment.points, points(2));
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let codec = PayloadCodec::default();
        let bytes = codec.encode_stroke_segment(StrokeState::Start, &points(3), &STROKE);
        let result = codec.decode_stroke_segment(&bytes[..bytes.len() - 1], &STROKE);
        assert!(matches!(result, Err(IngestError::MalformedPayload { .. })));
    }

    #[test]
    fn test_trailing_bytes_are_malformed() {
        let codec = PayloadCodec::default();
        let mut bytes = codec.encode_stroke_segment(StrokeState::Start, &points(1), &STROKE);
        bytes.push(0);
        assert!(codec.decode(&bytes, &STROKE).is_err());
    }

    #[test]
    fn test_count_past_end_is_malformed() {
        let codec = PayloadCodec::default();
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&1000i32.to_le_bytes());
        bytes.extend_from_slice(&[0; 8]);
        assert!(matches!(
            codec.decode(&bytes, &STROKE),
            Err(IngestError::MalformedPayload { .. })
        ));

        let mut negative = vec![0u8];
        negative.extend_from_slice(&(-1i32).to_le_bytes());
        assert!(codec.decode(&negative, &STROKE).is_err());
    }

    #[test]
    fn test_unknown_state_byte_is_rejected() {
        let codec = PayloadCodec::default();
        let mut bytes = codec.encode_stroke_segment(StrokeState::Start, &points(1), &STROKE);
        bytes[0] = 7;
        assert!(codec.decode_stroke_segment(&bytes, &STROKE).is_err());
    }

    #[test]
    fn test_prediction_float_score() {
        let codec = PayloadCodec::default();
        let prediction = PredictionResult {
            label_index: 3,
            score: 0.9,
        };
        let bytes = codec.encode_prediction(&prediction, &PREDICTION, 100.0);
        assert_eq!(bytes.len(), 8);
        assert_eq!(
            codec.decode_prediction(&bytes, &PREDICTION, 100.0),
            Ok(prediction)
        );
    }

    #[test]
    fn test_prediction_integer_score_is_scaled() {
        let structures = [FieldKind::Int32, FieldKind::Int32];
        let codec = PayloadCodec::default();
        let mut bytes = 1i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&75i32.to_le_bytes());
        let prediction = codec.decode_prediction(&bytes, &structures, 100.0).unwrap();
        assert_eq!(prediction.label_index, 1);
        assert!((prediction.score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_prediction_score_out_of_range() {
        let structures = [FieldKind::Int32, FieldKind::Int32];
        let codec = PayloadCodec::default();
        let mut bytes = 1i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&250i32.to_le_bytes());
        assert!(codec.decode_prediction(&bytes, &structures, 100.0).is_err());
    }

    #[test]
    fn test_prediction_wrong_length() {
        let codec = PayloadCodec::default();
        assert!(codec.decode_prediction(&[0, 0, 0], &PREDICTION, 100.0).is_err());
    }

    proptest! {
        #[test]
        fn prop_stroke_round_trip(
            coords in proptest::collection::vec((any::<i32>(), any::<i32>()), 0..64),
            state in 0u8..3,
            big in any::<bool>(),
        ) {
            let codec = PayloadCodec::new(if big { ByteOrder::Big } else { ByteOrder::Little });
            let original: Vec<Point> = coords
                .iter()
                .map(|(x, y)| Point::new(f64::from(*x), f64::from(*y)))
                .collect();
            let state = StrokeState::from_wire(state as i64).unwrap();
            let bytes = codec.encode_stroke_segment(state, &original, &STROKE);
            let segment = codec.decode_stroke_segment(&bytes, &STROKE).unwrap();
            prop_assert_eq!(segment.state, state);
            prop_assert_eq!(segment.length as usize, original.len());
            prop_assert_eq!(segment.points, original);
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let codec = PayloadCodec::default();
            let _ = codec.decode(&bytes, &STROKE);
            let _ = codec.decode_prediction(&bytes, &PREDICTION, 100.0);
        }
    }
}
