//! Priority arbitrator: merges every registered source into one visible
//! entry.
//!
//! Grounded on the `PriorityMuxer` referenced by this corpus's `Instance`
//! (one map keyed by priority, a visible-selection rule, expiry by a
//! monotonic clock) but reworked from a channel-driven mux into a plain
//! owned map the supervisor calls into directly, since spec.md's
//! `register`/`setColor`/`setImage`/`clear` operations are synchronous
//! state transitions rather than messages to relay.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::clock::{Clock, Millis};
use crate::color::Rgb8;
use crate::image::Image;

/// Priority reserved for "no source": always present, carries black, never
/// removed by `clear_all`.
pub const NO_SOURCE_PRIORITY: u8 = 255;

/// Priorities in this band are reserved for effects; an unprivileged
/// `clear`/`clear_all(force=false)` leaves them untouched (spec.md §9
/// "Priority namespace policy"; band bounds per SPEC_FULL.md §4.1).
pub const LOWEST_EFFECT_PRIORITY: u8 = 64;
pub const HIGHEST_EFFECT_PRIORITY: u8 = 254;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArbitratorError {
    #[error("priority {0} is not registered")]
    NotRegistered(u8),
    #[error("priority {0} is out of range or reserved")]
    InvalidPriority(u8),
}

/// What kind of data a priority entry is currently carrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Color,
    Image,
    Effect,
}

/// The payload of one priority entry: either a per-LED color vector or a
/// full image to be reduced, or neither yet (registered but idle).
#[derive(Clone, Debug)]
pub enum Payload {
    None,
    Colors(Vec<Rgb8>),
    Image(Image),
}

#[derive(Clone, Debug)]
pub struct PriorityEntry {
    pub kind: SourceKind,
    pub origin: String,
    pub owner: String,
    pub payload: Payload,
    /// `None` means no expiry.
    pub expiry_ms: Option<Millis>,
    pub smoothing_id: Option<String>,
    /// Set by `set_input_inactive`: the entry stays in the map (so
    /// `getPriorityInfo` still reports it) but is skipped during
    /// visible-priority selection until fresh color/image data arrives
    /// (spec.md §9 open question, resolved "considered but suppressed" in
    /// SPEC_FULL.md §9).
    pub inactive: bool,
}

impl PriorityEntry {
    fn is_expired(&self, now: Millis) -> bool {
        matches!(self.expiry_ms, Some(t) if t <= now)
    }

    fn is_selectable(&self) -> bool {
        !self.inactive && !matches!(self.payload, Payload::None)
    }
}

/// Notification of a change in the visible source, so downstream
/// components (reducer, driver power state) can react.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    VisibilityChanged { priority: u8 },
    KindChanged { priority: u8, kind_was_image: bool },
    DeviceOff,
}

/// Holds every registered priority entry and picks the one visible source.
pub struct Arbitrator {
    entries: BTreeMap<u8, PriorityEntry>,
    auto_select: bool,
    forced_visible: Option<u8>,
    last_visible: Option<u8>,
}

impl Arbitrator {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            NO_SOURCE_PRIORITY,
            PriorityEntry {
                kind: SourceKind::Color,
                origin: "core".to_string(),
                owner: "core".to_string(),
                payload: Payload::Colors(Vec::new()),
                expiry_ms: None,
                smoothing_id: None,
                inactive: false,
            },
        );
        Self {
            entries,
            auto_select: true,
            forced_visible: None,
            last_visible: None,
        }
    }

    fn check_priority(priority: u8, unprivileged: bool) -> Result<(), ArbitratorError> {
        if priority == NO_SOURCE_PRIORITY {
            return Ok(());
        }
        if unprivileged && (LOWEST_EFFECT_PRIORITY..=HIGHEST_EFFECT_PRIORITY).contains(&priority) {
            return Err(ArbitratorError::InvalidPriority(priority));
        }
        Ok(())
    }

    pub fn register(
        &mut self,
        priority: u8,
        kind: SourceKind,
        origin: impl Into<String>,
        owner: impl Into<String>,
        smoothing_id: Option<String>,
    ) -> Result<(), ArbitratorError> {
        Self::check_priority(priority, false)?;
        let entry = self.entries.entry(priority).or_insert_with(|| PriorityEntry {
            kind,
            origin: origin.into(),
            owner: owner.into(),
            payload: Payload::None,
            expiry_ms: None,
            smoothing_id: smoothing_id.clone(),
            inactive: false,
        });
        entry.kind = kind;
        entry.smoothing_id = smoothing_id;
        Ok(())
    }

    fn expiry_at(clock: &dyn Clock, timeout_ms: i64) -> Option<Millis> {
        if timeout_ms < 0 {
            None
        } else {
            Some(clock.now_ms() + timeout_ms)
        }
    }

    /// Attach a color vector. Vectors shorter than `led_count` are tiled to
    /// fill it (spec.md §4.1); implicitly registers if absent.
    pub fn set_color(
        &mut self,
        clock: &dyn Clock,
        priority: u8,
        colors: &[Rgb8],
        timeout_ms: i64,
        led_count: usize,
    ) -> Result<(), ArbitratorError> {
        Self::check_priority(priority, false)?;
        let tiled = tile_colors(colors, led_count);
        let expiry_ms = Self::expiry_at(clock, timeout_ms);
        let entry = self.entries.entry(priority).or_insert_with(|| PriorityEntry {
            kind: SourceKind::Color,
            origin: "unknown".to_string(),
            owner: "unknown".to_string(),
            payload: Payload::None,
            expiry_ms: None,
            smoothing_id: None,
            inactive: false,
        });
        entry.kind = SourceKind::Color;
        entry.payload = Payload::Colors(tiled);
        entry.expiry_ms = expiry_ms;
        entry.inactive = false;
        Ok(())
    }

    /// Attach an image; fails with [`ArbitratorError::NotRegistered`] if the
    /// priority has no prior `register` call.
    pub fn set_image(
        &mut self,
        clock: &dyn Clock,
        priority: u8,
        image: Image,
        timeout_ms: i64,
    ) -> Result<(), ArbitratorError> {
        Self::check_priority(priority, false)?;
        let expiry_ms = Self::expiry_at(clock, timeout_ms);
        let entry = self
            .entries
            .get_mut(&priority)
            .ok_or(ArbitratorError::NotRegistered(priority))?;
        entry.kind = if image.is_color() {
            SourceKind::Color
        } else {
            SourceKind::Image
        };
        entry.payload = Payload::Image(image);
        entry.expiry_ms = expiry_ms;
        entry.inactive = false;
        Ok(())
    }

    pub fn clear(&mut self, priority: u8) -> Result<(), ArbitratorError> {
        if priority == NO_SOURCE_PRIORITY {
            return Err(ArbitratorError::InvalidPriority(priority));
        }
        Self::check_priority(priority, true)?;
        self.entries.remove(&priority);
        Ok(())
    }

    /// Remove every entry but [`NO_SOURCE_PRIORITY`]. With `force = false`
    /// the effect band (`LOWEST_EFFECT_PRIORITY..=HIGHEST_EFFECT_PRIORITY`)
    /// is left untouched, matching an unprivileged `clear`; `force = true`
    /// removes it too (spec.md §9 "Priority namespace policy").
    pub fn clear_all(&mut self, force: bool) {
        self.entries.retain(|&p, _| {
            p == NO_SOURCE_PRIORITY
                || (!force && (LOWEST_EFFECT_PRIORITY..=HIGHEST_EFFECT_PRIORITY).contains(&p))
        });
    }

    /// Mark a priority "considered but suppressed": it stays in the map (so
    /// `getPriorityInfo` still reports it) but is skipped during
    /// visible-priority selection until fresh color/image data arrives.
    pub fn set_input_inactive(&mut self, priority: u8) -> Result<(), ArbitratorError> {
        let entry = self
            .entries
            .get_mut(&priority)
            .ok_or(ArbitratorError::NotRegistered(priority))?;
        entry.inactive = true;
        Ok(())
    }

    pub fn set_auto_select(&mut self, enabled: bool) {
        self.auto_select = enabled;
    }

    pub fn set_visible_priority(&mut self, priority: Option<u8>) {
        self.forced_visible = priority;
    }

    /// Remove every expired entry (besides [`NO_SOURCE_PRIORITY`], which
    /// never expires), returning the priorities removed.
    pub fn expire(&mut self, clock: &dyn Clock) -> Vec<u8> {
        let now = clock.now_ms();
        let expired: Vec<u8> = self
            .entries
            .iter()
            .filter(|(&p, e)| p != NO_SOURCE_PRIORITY && e.is_expired(now))
            .map(|(&p, _)| p)
            .collect();
        for p in &expired {
            self.entries.remove(p);
        }
        expired
    }

    /// The visible priority: the forced one if set and present, else the
    /// lowest-numbered selectable non-expired entry (invariant 1).
    pub fn visible_priority(&self, clock: &dyn Clock) -> u8 {
        if !self.auto_select {
            if let Some(forced) = self.forced_visible {
                if self.entries.contains_key(&forced) {
                    return forced;
                }
            }
        }
        let now = clock.now_ms();
        self.entries
            .iter()
            .find(|(&p, e)| p != NO_SOURCE_PRIORITY && !e.is_expired(now) && e.is_selectable())
            .map(|(&p, _)| p)
            .unwrap_or(NO_SOURCE_PRIORITY)
    }

    pub fn entry(&self, priority: u8) -> Option<&PriorityEntry> {
        self.entries.get(&priority)
    }

    /// Recompute the visible priority, returning the notifications a caller
    /// should dispatch (spec.md §4.1: "change in visible priority emits a
    /// notification; a change in kind also emits a secondary notification").
    pub fn poll(&mut self, clock: &dyn Clock) -> Vec<Notification> {
        self.expire(clock);
        let visible = self.visible_priority(clock);
        let mut out = Vec::new();
        if self.last_visible != Some(visible) {
            out.push(Notification::VisibilityChanged { priority: visible });
            if visible == NO_SOURCE_PRIORITY {
                out.push(Notification::DeviceOff);
            }
            if let (Some(prev), Some(entry)) = (self.last_visible, self.entries.get(&visible)) {
                let was_image = self
                    .entries
                    .get(&prev)
                    .map(|e| e.kind == SourceKind::Image)
                    .unwrap_or(false);
                if was_image != (entry.kind == SourceKind::Image) {
                    out.push(Notification::KindChanged {
                        priority: visible,
                        kind_was_image: was_image,
                    });
                }
            }
            self.last_visible = Some(visible);
        }
        out
    }
}

impl Default for Arbitrator {
    fn default() -> Self {
        Self::new()
    }
}

fn tile_colors(colors: &[Rgb8], led_count: usize) -> Vec<Rgb8> {
    if colors.is_empty() {
        return vec![Rgb8::BLACK; led_count];
    }
    (0..led_count).map(|i| colors[i % colors.len()]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    fn clock(ms: i64) -> TestClock {
        TestClock::new(ms)
    }

    #[test]
    fn visible_defaults_to_no_source() {
        let arb = Arbitrator::new();
        let clk = clock(0);
        assert_eq!(arb.visible_priority(&clk), NO_SOURCE_PRIORITY);
    }

    #[test]
    fn set_color_implicitly_registers() {
        let mut arb = Arbitrator::new();
        let clk = clock(0);
        arb.set_color(&clk, 10, &[Rgb8::new(1, 2, 3)], -1, 5).unwrap();
        assert_eq!(arb.visible_priority(&clk), 10);
    }

    #[test]
    fn lower_priority_number_wins() {
        let mut arb = Arbitrator::new();
        let clk = clock(0);
        arb.set_color(&clk, 50, &[Rgb8::new(1, 1, 1)], -1, 3).unwrap();
        arb.set_color(&clk, 10, &[Rgb8::new(2, 2, 2)], -1, 3).unwrap();
        assert_eq!(arb.visible_priority(&clk), 10);
    }

    #[test]
    fn set_image_requires_prior_register() {
        let mut arb = Arbitrator::new();
        let clk = clock(0);
        let err = arb
            .set_image(&clk, 20, Image::solid(2, 2, Rgb8::BLACK), -1)
            .unwrap_err();
        assert_eq!(err, ArbitratorError::NotRegistered(20));
    }

    #[test]
    fn tiling_fills_short_vector() {
        let mut arb = Arbitrator::new();
        let clk = clock(0);
        arb.set_color(&clk, 10, &[Rgb8::new(1, 2, 3)], -1, 4).unwrap();
        match &arb.entry(10).unwrap().payload {
            Payload::Colors(colors) => assert_eq!(colors.len(), 4),
            _ => panic!("expected colors"),
        }
    }

    #[test]
    fn expiry_removes_entries() {
        let mut arb = Arbitrator::new();
        let clk = clock(0);
        arb.set_color(&clk, 10, &[Rgb8::new(1, 1, 1)], 100, 3).unwrap();
        assert_eq!(arb.visible_priority(&clk), 10);
        clk.advance(150);
        arb.expire(&clk);
        assert_eq!(arb.visible_priority(&clk), NO_SOURCE_PRIORITY);
    }

    #[test]
    fn zero_timeout_is_a_no_op() {
        let mut arb = Arbitrator::new();
        let clk = clock(0);
        arb.set_color(&clk, 10, &[Rgb8::new(9, 9, 9)], 0, 3).unwrap();
        clk.advance(1);
        arb.expire(&clk);
        assert_eq!(arb.visible_priority(&clk), NO_SOURCE_PRIORITY);
    }

    #[test]
    fn clear_all_keeps_no_source_priority() {
        let mut arb = Arbitrator::new();
        let clk = clock(0);
        arb.set_color(&clk, 10, &[Rgb8::new(1, 1, 1)], -1, 3).unwrap();
        arb.clear_all(false);
        assert_eq!(arb.visible_priority(&clk), NO_SOURCE_PRIORITY);
        assert!(arb.entry(NO_SOURCE_PRIORITY).is_some());
    }

    #[test]
    fn clear_of_effect_band_is_rejected_for_unprivileged_caller() {
        let mut arb = Arbitrator::new();
        let clk = clock(0);
        arb.set_color(&clk, 245, &[Rgb8::new(1, 1, 1)], -1, 3).unwrap();
        let err = arb.clear(245).unwrap_err();
        assert_eq!(err, ArbitratorError::InvalidPriority(245));
    }

    #[test]
    fn clear_all_unforced_leaves_effect_band_intact() {
        let mut arb = Arbitrator::new();
        let clk = clock(0);
        arb.set_color(&clk, 10, &[Rgb8::new(1, 1, 1)], -1, 3).unwrap();
        arb.set_color(&clk, 100, &[Rgb8::new(2, 2, 2)], -1, 3).unwrap();
        arb.clear_all(false);
        assert!(arb.entry(10).is_none());
        assert!(arb.entry(100).is_some());
    }

    #[test]
    fn clear_all_forced_removes_effect_band() {
        let mut arb = Arbitrator::new();
        let clk = clock(0);
        arb.set_color(&clk, 100, &[Rgb8::new(2, 2, 2)], -1, 3).unwrap();
        arb.clear_all(true);
        assert!(arb.entry(100).is_none());
    }

    #[test]
    fn inactive_input_is_considered_but_suppressed() {
        let mut arb = Arbitrator::new();
        let clk = clock(0);
        arb.set_color(&clk, 10, &[Rgb8::new(1, 1, 1)], -1, 3).unwrap();
        arb.set_input_inactive(10).unwrap();
        assert_eq!(arb.visible_priority(&clk), NO_SOURCE_PRIORITY);
        assert!(arb.entry(10).is_some());
        arb.set_color(&clk, 10, &[Rgb8::new(2, 2, 2)], -1, 3).unwrap();
        assert_eq!(arb.visible_priority(&clk), 10);
    }

    #[test]
    fn register_then_clear_is_equivalent_to_before() {
        let mut arb = Arbitrator::new();
        let clk = clock(0);
        let before = arb.visible_priority(&clk);
        arb.register(10, SourceKind::Color, "test", "test", None).unwrap();
        arb.clear(10).unwrap();
        assert_eq!(arb.visible_priority(&clk), before);
    }

    #[test]
    fn forced_visible_overrides_priority_order() {
        let mut arb = Arbitrator::new();
        let clk = clock(0);
        arb.set_color(&clk, 10, &[Rgb8::new(1, 1, 1)], -1, 3).unwrap();
        arb.set_color(&clk, 50, &[Rgb8::new(2, 2, 2)], -1, 3).unwrap();
        arb.set_auto_select(false);
        arb.set_visible_priority(Some(50));
        assert_eq!(arb.visible_priority(&clk), 50);
    }
}
