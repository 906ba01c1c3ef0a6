use crate::domain::errors::IngestError;
use crate::domain::models::{DeviceRole, Point, Stroke, StrokeSegment, StrokeState};
use tracing::{debug, trace};

/// What a segment did to the stroke in flight
#[derive(Debug, Clone, PartialEq)]
pub enum StrokeProgress {
    Started,
    Extended,
    Completed(Stroke),
}

/// Assembles stroke notifications of one device into complete strokes.
///
/// One instance exists per device role; instances share nothing.
pub struct StrokeAggregator {
    role: DeviceRole,
    points: Vec<Point>,
    declared_length: usize,
    is_collecting: bool,
    previous_state: StrokeState,
}

impl StrokeAggregator {
    pub fn new(role: DeviceRole) -> Self {
        Self {
            role,
            points: Vec::new(),
            declared_length: 0,
            is_collecting: false,
            previous_state: StrokeState::Idle,
        }
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn is_collecting(&self) -> bool {
        self.is_collecting
    }

    /// State byte of the last accepted segment, `Idle` after a reset
    pub fn previous_state(&self) -> StrokeState {
        self.previous_state
    }

    /// Points of the stroke in flight
    pub fn buffered_points(&self) -> &[Point] {
        &self.points
    }

    pub fn process(&mut self, segment: StrokeSegment) -> Result<StrokeProgress, IngestError> {
        match segment.state {
            StrokeState::Start => {
                self.start_stroke(segment);
                Ok(StrokeProgress::Started)
            }
            StrokeState::Continue if self.is_collecting => {
                self.update_stroke(segment);
                Ok(StrokeProgress::Extended)
            }
            StrokeState::End if self.is_collecting => {
                Ok(StrokeProgress::Completed(self.end_stroke(segment)))
            }
            StrokeState::Continue | StrokeState::End => Err(self.violation(
                segment.state,
                "no stroke in progress, segment dropped",
            )),
            StrokeState::Idle => Err(self.violation(segment.state, "idle is not a wire state")),
        }
    }

    /// Drop whatever is in flight (disconnect or transport failure)
    pub fn reset(&mut self) {
        if self.is_collecting {
            debug!(
                role = %self.role,
                points = self.points.len(),
                "discarding unfinished stroke"
            );
        }
        self.points.clear();
        self.declared_length = 0;
        self.is_collecting = false;
        self.previous_state = StrokeState::Idle;
    }

    fn start_stroke(&mut self, segment: StrokeSegment) {
        if self.is_collecting {
            debug!(
                role = %self.role,
                points = self.points.len(),
                "new stroke started before the previous one ended"
            );
        }
        self.points.clear();
        self.declared_length = segment.length as usize;
        self.points.extend(segment.points);
        self.is_collecting = true;
        self.previous_state = StrokeState::Start;
        trace!(role = %self.role, points = self.points.len(), "stroke started");
    }

    fn update_stroke(&mut self, segment: StrokeSegment) {
        self.declared_length += segment.length as usize;
        self.points.extend(segment.points);
        self.previous_state = StrokeState::Continue;
    }

    fn end_stroke(&mut self, segment: StrokeSegment) -> Stroke {
        self.declared_length += segment.length as usize;
        self.points.extend(segment.points);

        let stroke = Stroke::sealed(
            self.role,
            std::mem::take(&mut self.points),
            self.declared_length,
        );
        self.declared_length = 0;
        self.is_collecting = false;
        self.previous_state = StrokeState::End;

        debug!(role = %self.role, points = stroke.len(), "stroke completed");
        stroke
    }

    fn violation(&self, state: StrokeState, detail: &str) -> IngestError {
        debug!(role = %self.role, state = %state, "{}", detail);
        IngestError::ProtocolViolation {
            role: self.role,
            state: state.to_string(),
            detail: detail.to_string(),
        }
    }
}
