//! Diagnostic overlay drawing.
//!
//! Overlays visualize what the classifier saw: the control zones, the hand skeleton, the palm
//! reference line, and the resulting command. They are drawn onto the published frame *after*
//! classification, so drawing can never influence the computed command.

use std::convert::Infallible;

use embedded_graphics::{
    mono_font::{ascii, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Circle, Line, PrimitiveStyle, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use nalgebra::Point2;

use crate::classify::{tilt_degrees, Command};
use crate::config::{PixelRect, ZoneSet};
use crate::hand::{HandLandmarks, LandmarkIdx, CONNECTIVITY};
use crate::video::{Frame, Resolution};

const ZONE_COLOR: Rgb888 = Rgb888::RED;
const SKELETON_COLOR: Rgb888 = Rgb888::GREEN;
const TEXT_COLOR: Rgb888 = Rgb888::GREEN;

/// Guard returned by [`rect`]; draws the rectangle when dropped and allows customization.
pub struct DrawRect<'a> {
    frame: &'a mut Frame,
    rect: PixelRect,
    color: Rgb888,
    stroke_width: u32,
}

impl DrawRect<'_> {
    /// Sets the rectangle's color.
    pub fn color(&mut self, color: Rgb888) -> &mut Self {
        self.color = color;
        self
    }

    /// Sets the rectangle's stroke width.
    ///
    /// By default, a stroke width of 2 is used.
    pub fn stroke_width(&mut self, width: u32) -> &mut Self {
        self.stroke_width = width;
        self
    }
}

impl Drop for DrawRect<'_> {
    fn drop(&mut self) {
        let top_left = Point::new(self.rect.x_min as i32, self.rect.y_min as i32);
        let size = Size::new(
            (self.rect.x_max - self.rect.x_min).max(0.0) as u32,
            (self.rect.y_max - self.rect.y_min).max(0.0) as u32,
        );
        done(
            Rectangle::new(top_left, size)
                .into_styled(PrimitiveStyle::with_stroke(self.color, self.stroke_width))
                .draw(self.frame),
        );
    }
}

/// Draws the outline of a pixel-space rectangle.
pub fn rect(frame: &mut Frame, rect: PixelRect) -> DrawRect<'_> {
    DrawRect {
        frame,
        rect,
        color: ZONE_COLOR,
        stroke_width: 2,
    }
}

/// Draws a line between two pixel-space points.
pub fn line(frame: &mut Frame, a: Point2<f32>, b: Point2<f32>, color: Rgb888) {
    done(
        Line::new(to_point(a), to_point(b))
            .into_styled(PrimitiveStyle::with_stroke(color, 1))
            .draw(frame),
    );
}

/// Draws a small circular marker centered on a pixel-space point.
pub fn marker(frame: &mut Frame, at: Point2<f32>) {
    const DIAMETER: u32 = 5;
    done(
        Circle::with_center(to_point(at), DIAMETER)
            .into_styled(PrimitiveStyle::with_fill(SKELETON_COLOR))
            .draw(frame),
    );
}

/// Draws text with its top-left corner at a pixel-space point.
pub fn text(frame: &mut Frame, at: Point2<f32>, text: &str) {
    let style = TextStyleBuilder::new()
        .alignment(Alignment::Left)
        .baseline(Baseline::Top)
        .build();
    done(
        Text::with_text_style(
            text,
            to_point(at),
            MonoTextStyle::new(&ascii::FONT_6X10, TEXT_COLOR),
            style,
        )
        .draw(frame),
    );
}

/// Draws the full per-frame diagnostic overlay.
pub fn overlay(frame: &mut Frame, hands: &[HandLandmarks], zones: &ZoneSet, command: Command) {
    let resolution = frame.resolution();

    for (zone, label) in [(&zones.forward, "FORWARD"), (&zones.backward, "BACKWARD")] {
        let px = zone.to_pixels(resolution);
        rect(frame, px);
        // Label just above the zone, clamped into the frame like the original overlay.
        let label_y = (px.y_min - 12.0).max(2.0);
        text(frame, Point2::new(px.x_min, label_y), label);
    }

    for hand in hands {
        draw_hand(frame, hand, resolution);
    }

    text(frame, Point2::new(8.0, 8.0), &format!("Command: {command}"));
}

fn draw_hand(frame: &mut Frame, hand: &HandLandmarks, resolution: Resolution) {
    for &(a, b) in CONNECTIVITY {
        line(
            frame,
            to_pixels(hand.position(a), resolution),
            to_pixels(hand.position(b), resolution),
            SKELETON_COLOR,
        );
    }
    for &position in hand.positions() {
        marker(frame, to_pixels(position, resolution));
    }

    // The palm reference line the tilt is derived from, with the measured angle next to it.
    let wrist = to_pixels(hand.position(LandmarkIdx::Wrist), resolution);
    let knuckle = to_pixels(hand.position(LandmarkIdx::MiddleFingerMcp), resolution);
    line(frame, wrist, knuckle, Rgb888::new(127, 127, 127));
    text(
        frame,
        wrist + nalgebra::Vector2::new(4.0, 4.0),
        &format!("{:.1} deg", tilt_degrees(hand)),
    );
}

fn to_pixels(point: Point2<f32>, resolution: Resolution) -> Point2<f32> {
    Point2::new(
        point.x * resolution.width() as f32,
        point.y * resolution.height() as f32,
    )
}

fn to_point(point: Point2<f32>) -> Point {
    Point::new(point.x as i32, point.y as i32)
}

fn done<T>(result: Result<T, Infallible>) {
    match result {
        Ok(_) => {}
        Err(infallible) => match infallible {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn overlay_touches_zone_outline_pixels() {
        let config = Config::default();
        let mut frame = Frame::new(Resolution::new(100, 100));
        let hand = HandLandmarks::uniform(Point2::new(0.5, 0.5));

        overlay(&mut frame, &[hand], &config.zones, Command::Stop);

        // Top-left corner of the forward zone {0.4, 0.0, 0.2, 0.3} must be stroked.
        let px = frame.image().get_pixel(40, 0);
        assert_ne!(px.0, [0, 0, 0]);
    }

    #[test]
    fn overlay_handles_out_of_range_landmarks() {
        let config = Config::default();
        let mut frame = Frame::new(Resolution::new(64, 64));
        // Detector noise can push landmarks outside [0, 1]; drawing must clip, not panic.
        let hand = HandLandmarks::uniform(Point2::new(1.2, -0.3));
        overlay(&mut frame, &[hand], &config.zones, Command::Forward);
    }
}
