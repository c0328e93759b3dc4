//! Geometric gesture classification.
//!
//! Classification is a pure function of the observed hands, the configured control zones, and the
//! resolution of the frame the landmarks were detected in. It holds no state across frames.
//!
//! Per hand, zone hits take precedence over hand tilt: a hand parked in the forward zone always
//! commands FORWARD, no matter how far it is tilted. When both zones overlap and a hand sits in
//! the overlap, the forward zone wins.

use std::fmt;

use nalgebra::Point2;

use crate::config::ZoneSet;
use crate::hand::{HandLandmarks, LandmarkIdx};
use crate::video::Resolution;

/// A discrete drive command for the remote actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    /// The neutral command. Commanded when no hand is visible or the visible hand matches no
    /// gesture.
    #[default]
    Stop,
    Forward,
    Backward,
    Left,
    Right,
}

impl Command {
    /// Returns the wire representation: the literal uppercase command name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Stop => "STOP",
            Command::Forward => "FORWARD",
            Command::Backward => "BACKWARD",
            Command::Left => "LEFT",
            Command::Right => "RIGHT",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies the hands observed in one frame into a single [`Command`].
///
/// Hands are processed in the order the detector reported them; every hand fully overwrites the
/// result of the previous one, so the last hand decides. No hands means [`Command::Stop`].
pub fn classify(hands: &[HandLandmarks], zones: &ZoneSet, resolution: Resolution) -> Command {
    let mut command = Command::Stop;
    for hand in hands {
        command = classify_hand(hand, zones, resolution);
    }
    command
}

fn classify_hand(hand: &HandLandmarks, zones: &ZoneSet, resolution: Resolution) -> Command {
    // The two palm landmarks that have to sit inside a zone for it to trigger.
    let knuckle = to_pixels(hand.position(LandmarkIdx::MiddleFingerMcp), resolution);
    let ring_knuckle = to_pixels(hand.position(LandmarkIdx::RingFingerMcp), resolution);

    let forward = zones.forward.to_pixels(resolution);
    let backward = zones.backward.to_pixels(resolution);

    if forward.contains(knuckle) && forward.contains(ring_knuckle) {
        Command::Forward
    } else if backward.contains(knuckle) && backward.contains(ring_knuckle) {
        Command::Backward
    } else {
        let angle = tilt_degrees(hand);
        if angle > zones.turn_angle_threshold {
            Command::Right
        } else if angle < -zones.turn_angle_threshold {
            Command::Left
        } else {
            Command::Stop
        }
    }
}

/// Computes the tilt of the palm in degrees, in `(-180.0, 180.0]`.
///
/// A tilt of 0° means the fingers point straight up (wrist below the middle-finger knuckle in
/// image coordinates). Positive values tilt clockwise on screen.
pub fn tilt_degrees(hand: &HandLandmarks) -> f32 {
    let wrist = hand.position(LandmarkIdx::Wrist);
    let knuckle = hand.position(LandmarkIdx::MiddleFingerMcp);
    let rel = wrist - knuckle;

    let mut angle = rel.y.atan2(rel.x).to_degrees() - 90.0;
    if angle <= -180.0 {
        angle += 360.0;
    } else if angle > 180.0 {
        angle -= 360.0;
    }
    angle
}

fn to_pixels(point: Point2<f32>, resolution: Resolution) -> Point2<f32> {
    Point2::new(
        point.x * resolution.width() as f32,
        point.y * resolution.height() as f32,
    )
}
