//! End-to-end tests of the control session lifecycle, driven entirely by scripted sources and a
//! loopback UDP actuator.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nalgebra::{Point2, Vector2};

use handwavium::classify::Command;
use handwavium::config::{Config, ConfigStore, DetectionConfig, NetworkEndpoint, Zone};
use handwavium::hand::{
    HandLandmarks, LandmarkIdx, LandmarkSource, ScriptStep, ScriptedHands,
};
use handwavium::session::{ControlSession, SessionError, SessionOptions, SessionState};
use handwavium::video::{Frame, FrameSource, Resolution, SyntheticCamera};

/// Wraps a [`SyntheticCamera`] and records when it is dropped.
struct TrackedCamera {
    inner: SyntheticCamera,
    released: Arc<AtomicBool>,
}

impl FrameSource for TrackedCamera {
    fn read(&mut self) -> anyhow::Result<Frame> {
        self.inner.read()
    }
}

impl Drop for TrackedCamera {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Wraps a [`ScriptedHands`] and records when it is dropped.
struct TrackedHands {
    inner: ScriptedHands,
    released: Arc<AtomicBool>,
}

impl LandmarkSource for TrackedHands {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandLandmarks>> {
        self.inner.detect(frame)
    }
}

impl Drop for TrackedHands {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// A frame source whose reads block for a long time, for exercising stop timeouts.
struct SluggishCamera;

impl FrameSource for SluggishCamera {
    fn read(&mut self) -> anyhow::Result<Frame> {
        thread::sleep(Duration::from_millis(500));
        Ok(Frame::new(Resolution::new(32, 32)))
    }
}

/// An upright hand whose palm landmarks all sit at `center` (0° tilt).
fn upright(center: Point2<f32>) -> HandLandmarks {
    HandLandmarks::uniform(center).with_position(
        LandmarkIdx::Wrist,
        center + Vector2::new(0.0, 0.2),
    )
}

/// A hand parked in the middle of the default forward zone.
fn forward_hand() -> HandLandmarks {
    upright(Point2::new(0.5, 0.12))
}

fn loopback_receiver() -> (UdpSocket, NetworkEndpoint) {
    let socket = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    socket
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();
    let port = socket.local_addr().unwrap().port();
    (
        socket,
        NetworkEndpoint {
            host: "127.0.0.1".into(),
            port,
        },
    )
}

fn drain(socket: &UdpSocket) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut buf = [0; 64];
    while let Ok((len, _)) = socket.recv_from(&mut buf) {
        payloads.push(String::from_utf8(buf[..len].to_vec()).unwrap());
    }
    payloads
}

fn store_with_endpoint(endpoint: &NetworkEndpoint) -> Arc<ConfigStore> {
    let mut config = Config::default();
    config.network = endpoint.clone();
    Arc::new(ConfigStore::new(config).unwrap())
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn test_options() -> SessionOptions {
    SessionOptions::default().retry_delay(Duration::from_millis(2))
}

#[test]
fn lifecycle_releases_resources() {
    let (_socket, endpoint) = loopback_receiver();
    let camera_released = Arc::new(AtomicBool::new(false));
    let hands_released = Arc::new(AtomicBool::new(false));

    let cam_flag = camera_released.clone();
    let hands_flag = hands_released.clone();
    let mut session = ControlSession::with_options(
        store_with_endpoint(&endpoint),
        move || {
            Ok(TrackedCamera {
                inner: SyntheticCamera::new(Resolution::RES_720P),
                released: cam_flag.clone(),
            })
        },
        move |_detection: &DetectionConfig| {
            Ok(TrackedHands {
                inner: ScriptedHands::new([ScriptStep::hand(forward_hand())]),
                released: hands_flag.clone(),
            })
        },
        test_options(),
    );

    assert_eq!(session.state(), SessionState::Idle);
    session.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        session.state() == SessionState::Running
    }));
    assert!(wait_until(Duration::from_secs(1), || session
        .latest()
        .is_some_and(|obs| obs.command == Command::Forward)));

    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(camera_released.load(Ordering::SeqCst));
    assert!(hands_released.load(Ordering::SeqCst));
}

#[test]
fn start_while_active_is_rejected() {
    let (_socket, endpoint) = loopback_receiver();
    let mut session = ControlSession::with_options(
        store_with_endpoint(&endpoint),
        || Ok(SyntheticCamera::new(Resolution::RES_720P)),
        |_: &DetectionConfig| Ok(ScriptedHands::new([ScriptStep::empty()])),
        test_options(),
    );

    session.start().unwrap();
    assert!(matches!(
        session.start(),
        Err(SessionError::AlreadyActive)
    ));
    // The running session is unaffected by the rejected start.
    assert!(wait_until(Duration::from_secs(1), || session
        .latest()
        .is_some()));
    session.stop().unwrap();
}

#[test]
fn stop_while_idle_is_a_noop() {
    let (_socket, endpoint) = loopback_receiver();
    let mut session = ControlSession::with_options(
        store_with_endpoint(&endpoint),
        || Ok(SyntheticCamera::new(Resolution::RES_720P)),
        |_: &DetectionConfig| Ok(ScriptedHands::new([])),
        test_options(),
    );

    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn acquisition_failure_surfaces_and_returns_to_idle() {
    let (_socket, endpoint) = loopback_receiver();
    let detector_builds = Arc::new(AtomicUsize::new(0));

    let builds = detector_builds.clone();
    let mut session = ControlSession::with_options(
        store_with_endpoint(&endpoint),
        || -> anyhow::Result<SyntheticCamera> { anyhow::bail!("no camera connected") },
        move |_: &DetectionConfig| {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedHands::new([]))
        },
        test_options(),
    );

    assert!(matches!(
        session.start(),
        Err(SessionError::Acquisition(_))
    ));
    assert_eq!(session.state(), SessionState::Idle);
    // The camera failed first, so the detector was never constructed.
    assert_eq!(detector_builds.load(Ordering::SeqCst), 0);
}

#[test]
fn debounce_and_stop_failsafe_on_the_wire() {
    let (socket, endpoint) = loopback_receiver();
    let mut session = ControlSession::with_options(
        store_with_endpoint(&endpoint),
        || Ok(SyntheticCamera::new(Resolution::RES_720P).fps(100)),
        |_: &DetectionConfig| Ok(ScriptedHands::new([ScriptStep::hand(forward_hand())])),
        test_options(),
    );

    session.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || session
        .latest()
        .is_some()));
    // Let a good number of identical frames through.
    thread::sleep(Duration::from_millis(150));
    session.stop().unwrap();

    // Many FORWARD frames, but exactly one datagram for them, plus the unconditional STOP
    // fail-safe on shutdown.
    assert_eq!(drain(&socket), ["FORWARD", "STOP"]);
}

#[test]
fn detection_failure_skips_frame_and_recovers() {
    let (socket, endpoint) = loopback_receiver();
    let script: Vec<ScriptStep> = std::iter::repeat(ScriptStep::hand(forward_hand()))
        .take(5)
        .chain([ScriptStep::Fail, ScriptStep::Fail])
        .chain(std::iter::repeat(ScriptStep::hand(forward_hand())).take(50))
        .collect();

    let mut session = ControlSession::with_options(
        store_with_endpoint(&endpoint),
        || Ok(SyntheticCamera::new(Resolution::RES_720P).fps(200)),
        move |_: &DetectionConfig| Ok(ScriptedHands::new(script.clone())),
        test_options(),
    );

    session.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || session
        .latest()
        .is_some_and(|obs| obs.command == Command::Forward)));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(session.state(), SessionState::Running);
    session.stop().unwrap();

    // The failed detections neither crashed the session nor produced any extra dispatch: the
    // prior FORWARD stayed in effect across the gap.
    assert_eq!(drain(&socket), ["FORWARD", "STOP"]);
}

#[test]
fn zone_update_applies_atomically_mid_session() {
    let (_socket, endpoint) = loopback_receiver();
    let store = store_with_endpoint(&endpoint);
    let mut session = ControlSession::with_options(
        store.clone(),
        || Ok(SyntheticCamera::new(Resolution::RES_720P)),
        |_: &DetectionConfig| Ok(ScriptedHands::new([ScriptStep::hand(forward_hand())])),
        test_options(),
    );

    session.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || session
        .latest()
        .is_some_and(|obs| obs.command == Command::Forward)));

    // Move the forward zone away from the hand; the upright hand then matches nothing.
    let mut config = (*store.snapshot()).clone();
    config.zones.forward = Zone::new(0.0, 0.4, 0.2, 0.2);
    session.update_config(config).unwrap();

    assert!(wait_until(Duration::from_secs(1), || session
        .latest()
        .is_some_and(|obs| obs.command == Command::Stop)));
    session.stop().unwrap();
}

#[test]
fn detector_reopens_when_confidences_change() {
    let (_socket, endpoint) = loopback_receiver();
    let store = store_with_endpoint(&endpoint);
    let detector_builds = Arc::new(AtomicUsize::new(0));

    let builds = detector_builds.clone();
    let mut session = ControlSession::with_options(
        store.clone(),
        || Ok(SyntheticCamera::new(Resolution::RES_720P)),
        move |_: &DetectionConfig| {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedHands::new([ScriptStep::empty()]))
        },
        test_options(),
    );

    session.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || session
        .latest()
        .is_some()));
    assert_eq!(detector_builds.load(Ordering::SeqCst), 1);

    // A zones-only change must not touch the detector.
    let mut config = (*store.snapshot()).clone();
    config.zones.turn_angle_threshold = 30.0;
    session.update_config(config).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(detector_builds.load(Ordering::SeqCst), 1);

    // Changing a confidence threshold reopens it in place, without leaving Running.
    let mut config = (*store.snapshot()).clone();
    config.detection.min_detection_confidence = 0.9;
    session.update_config(config).unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        detector_builds.load(Ordering::SeqCst) == 2
    }));
    assert_eq!(session.state(), SessionState::Running);
    session.stop().unwrap();
}

#[test]
fn stop_timeout_is_reported_and_resources_drain_later() {
    let (_socket, endpoint) = loopback_receiver();
    let mut session = ControlSession::with_options(
        store_with_endpoint(&endpoint),
        || Ok(SluggishCamera),
        |_: &DetectionConfig| Ok(ScriptedHands::new([ScriptStep::empty()])),
        test_options().stop_timeout(Duration::from_millis(50)),
    );

    session.start().unwrap();
    // Give the worker time to enter its first 500ms blocking read; the bounded wait then gives
    // up long before the read returns.
    thread::sleep(Duration::from_millis(100));
    assert!(matches!(
        session.stop(),
        Err(SessionError::StopTimeout(_))
    ));

    // Once the blocking read returns, the worker honors the cancellation on its own.
    thread::sleep(Duration::from_millis(700));
    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn read_failures_beyond_limit_end_the_session() {
    let (_socket, endpoint) = loopback_receiver();
    let camera_released = Arc::new(AtomicBool::new(false));

    let flag = camera_released.clone();
    let mut session = ControlSession::with_options(
        store_with_endpoint(&endpoint),
        move || {
            Ok(TrackedCamera {
                inner: SyntheticCamera::new(Resolution::RES_720P).fail_on(0..1000),
                released: flag.clone(),
            })
        },
        |_: &DetectionConfig| Ok(ScriptedHands::new([])),
        test_options().max_read_failures(3),
    );

    session.start().unwrap();
    // Three consecutive failures exhaust the limit; the session shuts itself down.
    assert!(wait_until(Duration::from_secs(1), || {
        session.state() == SessionState::Idle
    }));
    assert!(camera_released.load(Ordering::SeqCst));

    // The finished worker is reaped and a new one can start.
    assert!(matches!(
        session.start(),
        Ok(()) | Err(SessionError::Acquisition(_))
    ));
    session.stop().unwrap();
}

#[test]
fn restart_uses_a_fresh_worker() {
    let (_socket, endpoint) = loopback_receiver();
    let camera_builds = Arc::new(AtomicUsize::new(0));

    let builds = camera_builds.clone();
    let mut session = ControlSession::with_options(
        store_with_endpoint(&endpoint),
        move || {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(SyntheticCamera::new(Resolution::RES_720P))
        },
        |_: &DetectionConfig| Ok(ScriptedHands::new([ScriptStep::hand(forward_hand())])),
        test_options(),
    );

    for round in 1..=2 {
        session.start().unwrap();
        assert!(wait_until(Duration::from_secs(1), || session
            .latest()
            .is_some()));
        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(camera_builds.load(Ordering::SeqCst), round);
    }
}
