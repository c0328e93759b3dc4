//! Scripted demo: drives the full pipeline without a camera or detector.
//!
//! A synthetic camera paces the loop at 30 FPS while a scripted landmark source walks a hand
//! through the control zones and tilt gestures. Dispatched commands go to a UDP actuator on
//! localhost; command transitions are printed as they are observed.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nalgebra::{Point2, Vector2};

use handwavium::config::{Config, ConfigStore};
use handwavium::hand::{HandLandmarks, LandmarkIdx, ScriptStep, ScriptedHands};
use handwavium::session::ControlSession;
use handwavium::video::{Resolution, SyntheticCamera};

fn main() -> anyhow::Result<()> {
    handwavium::init_logger!();

    let mut config = Config::default();
    config.network.host = "127.0.0.1".into();
    let store = Arc::new(ConfigStore::new(config)?);

    let script = script();
    let mut session = ControlSession::new(
        store,
        || Ok(SyntheticCamera::new(Resolution::RES_720P).fps(30)),
        move |_detection| Ok(ScriptedHands::new(script.clone())),
    );

    session.start()?;
    let mut last = None;
    for _ in 0..120 {
        if let Some(observation) = session.latest() {
            if last != Some(observation.command) {
                println!("command: {}", observation.command);
                last = Some(observation.command);
            }
        }
        thread::sleep(Duration::from_millis(20));
    }
    session.stop()?;
    Ok(())
}

/// An upright hand (fingers pointing up, 0° tilt) with all palm landmarks near `center`.
fn upright(center: Point2<f32>) -> HandLandmarks {
    HandLandmarks::uniform(center).with_position(
        LandmarkIdx::Wrist,
        center + Vector2::new(0.0, 0.2),
    )
}

/// A hand held at `center` and tilted by moving the wrist sideways.
fn tilted(center: Point2<f32>, wrist_offset: f32) -> HandLandmarks {
    HandLandmarks::uniform(center).with_position(
        LandmarkIdx::Wrist,
        center + Vector2::new(wrist_offset, 0.0),
    )
}

fn script() -> Vec<ScriptStep> {
    let center = Point2::new(0.5, 0.5);
    let poses = [
        upright(Point2::new(0.2, 0.5)),  // neutral, outside all zones
        upright(Point2::new(0.5, 0.12)), // in the forward zone
        upright(Point2::new(0.5, 0.85)), // in the backward zone
        tilted(center, 0.1),             // tilted left
        tilted(center, -0.1),            // tilted right
    ];

    let mut steps = Vec::new();
    for pose in poses {
        steps.extend(std::iter::repeat(ScriptStep::hand(pose)).take(15));
    }
    // The hand leaves the view; STOP from here on.
    steps.push(ScriptStep::empty());
    steps
}
