//! Hand landmark data and the landmark detection seam.
//!
//! Landmark *estimation* (typically a neural network) is not part of this crate. The control
//! session only consumes the detector's output: per frame, zero or more hands, each described by
//! 21 ordered points in normalized image coordinates.

use anyhow::bail;
use nalgebra::Point2;

use crate::video::Frame;

/// Number of landmarks per hand.
pub const NUM_LANDMARKS: usize = 21;

/// Names for the hand pose landmarks.
///
/// The order matches the standard 21-point hand topology and is never permuted: `Wrist` is always
/// index 0, `MiddleFingerMcp` always index 9, and so on. All indexing into [`HandLandmarks`] goes
/// through this enum.
///
/// # Terminology
///
/// - **CMC**: Carpometacarpal joint, the lowest joint of the thumb, located near the wrist.
/// - **MCP**: Metacarpophalangeal joint, the lower joint forming the knuckles near the palm.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: placed on the tip of the finger, above the DIP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// Landmark pairs connected by the hand skeleton, used for diagnostic overlays.
pub const CONNECTIVITY: &[(LandmarkIdx, LandmarkIdx)] = {
    use LandmarkIdx::*;
    &[
        // Surround the palm:
        (Wrist, ThumbCmc),
        (ThumbCmc, IndexFingerMcp),
        (IndexFingerMcp, MiddleFingerMcp),
        (MiddleFingerMcp, RingFingerMcp),
        (RingFingerMcp, PinkyMcp),
        (PinkyMcp, Wrist),
        // Thumb:
        (ThumbCmc, ThumbMcp),
        (ThumbMcp, ThumbIp),
        (ThumbIp, ThumbTip),
        // Index:
        (IndexFingerMcp, IndexFingerPip),
        (IndexFingerPip, IndexFingerDip),
        (IndexFingerDip, IndexFingerTip),
        // Middle:
        (MiddleFingerMcp, MiddleFingerPip),
        (MiddleFingerPip, MiddleFingerDip),
        (MiddleFingerDip, MiddleFingerTip),
        // Ring:
        (RingFingerMcp, RingFingerPip),
        (RingFingerPip, RingFingerDip),
        (RingFingerDip, RingFingerTip),
        // Pinky:
        (PinkyMcp, PinkyPip),
        (PinkyPip, PinkyDip),
        (PinkyDip, PinkyTip),
    ]
};

/// One observed hand: 21 ordered landmark positions in normalized image coordinates.
///
/// Coordinates are *typically* inside `[0.0, 1.0]`, but detector noise can push them slightly
/// outside of that range, so they are not clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct HandLandmarks {
    positions: [Point2<f32>; NUM_LANDMARKS],
}

impl HandLandmarks {
    #[inline]
    pub fn new(positions: [Point2<f32>; NUM_LANDMARKS]) -> Self {
        Self { positions }
    }

    /// Creates a degenerate hand with every landmark at the same position.
    ///
    /// Mostly useful as a starting point for [`HandLandmarks::with_position`] in tests and demos.
    pub fn uniform(position: Point2<f32>) -> Self {
        Self {
            positions: [position; NUM_LANDMARKS],
        }
    }

    /// Returns the same hand with one landmark moved.
    #[must_use]
    pub fn with_position(mut self, index: LandmarkIdx, position: Point2<f32>) -> Self {
        self.positions[index as usize] = position;
        self
    }

    /// Returns the position of the given landmark.
    #[inline]
    pub fn position(&self, index: LandmarkIdx) -> Point2<f32> {
        self.positions[index as usize]
    }

    #[inline]
    pub fn positions(&self) -> &[Point2<f32>; NUM_LANDMARKS] {
        &self.positions
    }
}

/// Source of per-frame hand observations.
///
/// Implementors are constructed with the two confidence thresholds from
/// [`DetectionConfig`][crate::config::DetectionConfig]; the session recreates the instance
/// whenever those thresholds change, so construction should be cheap-ish but may fail.
pub trait LandmarkSource: Send {
    /// Detects hands in `frame`.
    ///
    /// The order of the returned hands is implementation-defined; the classifier gives the *last*
    /// hand precedence. A failed detection only skips the current frame.
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandLandmarks>>;
}

impl LandmarkSource for Box<dyn LandmarkSource> {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandLandmarks>> {
        (**self).detect(frame)
    }
}

/// One step of a [`ScriptedHands`] playback.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Report these hands.
    Hands(Vec<HandLandmarks>),
    /// Fail this detection.
    Fail,
}

impl ScriptStep {
    /// Convenience constructor for a single-hand observation.
    pub fn hand(hand: HandLandmarks) -> Self {
        Self::Hands(vec![hand])
    }

    /// Convenience constructor for "no hands visible".
    pub fn empty() -> Self {
        Self::Hands(Vec::new())
    }
}

/// A [`LandmarkSource`] that replays a predefined script instead of running a detector.
///
/// Once the script is exhausted, the last step is repeated indefinitely (an empty script reports
/// no hands). Used by the demo binary and the test suite.
pub struct ScriptedHands {
    steps: Vec<ScriptStep>,
    next: usize,
}

impl ScriptedHands {
    pub fn new<I: IntoIterator<Item = ScriptStep>>(steps: I) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            next: 0,
        }
    }
}

impl LandmarkSource for ScriptedHands {
    fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Vec<HandLandmarks>> {
        let Some(step) = self.steps.get(self.next.min(self.steps.len().saturating_sub(1))) else {
            return Ok(Vec::new());
        };
        let index = self.next;
        self.next += 1;
        match step {
            ScriptStep::Hands(hands) => Ok(hands.clone()),
            ScriptStep::Fail => bail!("scripted detection failure at step {index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::Resolution;

    #[test]
    fn landmark_indices_match_fixed_topology() {
        assert_eq!(LandmarkIdx::Wrist as usize, 0);
        assert_eq!(LandmarkIdx::ThumbTip as usize, 4);
        assert_eq!(LandmarkIdx::MiddleFingerMcp as usize, 9);
        assert_eq!(LandmarkIdx::RingFingerMcp as usize, 13);
        assert_eq!(LandmarkIdx::PinkyTip as usize, NUM_LANDMARKS - 1);
    }

    #[test]
    fn scripted_hands_repeat_last_step() {
        let hand = HandLandmarks::uniform(Point2::new(0.5, 0.5));
        let mut source = ScriptedHands::new([ScriptStep::empty(), ScriptStep::hand(hand.clone())]);
        let frame = Frame::new(Resolution::new(16, 16));

        assert!(source.detect(&frame).unwrap().is_empty());
        assert_eq!(source.detect(&frame).unwrap(), vec![hand.clone()]);
        // Script is exhausted; the last step keeps repeating.
        assert_eq!(source.detect(&frame).unwrap(), vec![hand]);
    }
}
