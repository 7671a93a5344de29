//! Instance supervisor: owns component F from spec.md's table — the
//! arbitrator, reducer, calibrator, smoother and driver handle for one LED
//! output — and exposes the control surface and event loop that wires them
//! together.
//!
//! Grounded on `alixinne-hyperion.rs`'s `Instance::run`: a `tokio::select!`
//! over an inbound source-event channel and the periodic ticks that drive
//! the pipeline forward, funneling every component's error into one
//! `InstanceError`-shaped enum — here, [`CoreError`].

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::arbitrator::{Arbitrator, Notification, Payload, SourceKind, NO_SOURCE_PRIORITY};
use crate::calibrator::{Calibration, Calibrator};
use crate::clock::{Clock, SystemClock};
use crate::color::Rgb8;
use crate::driver::{DeviceConfig, DriverHandle, DriverRegistry, PacingConfig};
use crate::image::Image;
use crate::layout::Layout;
use crate::reducer::{Reducer, ReducerPolicy};
use crate::smoothing::{Smoother, SmoothingConfig};
use crate::CoreError;

/// Component kinds spec.md §6's `setComponentState` switches on. `All`
/// toggles every other kind at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    All,
    LedDevice,
    Smoothing,
    Hdr,
    Video,
    Audio,
    Effect,
    Color,
    Image,
    Forwarder,
}

/// Per-component enable flags. `LedDevice`/`Smoothing` gate this crate's own
/// pipeline stages; the rest (`Hdr`/`Video`/`Audio`/`Effect`/`Forwarder`)
/// are bookkeeping only — their producers live outside this crate — but the
/// flags are tracked so `getAllComponents` reports them faithfully.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentState {
    pub led_device: bool,
    pub smoothing: bool,
    pub hdr: bool,
    pub video: bool,
    pub audio: bool,
    pub effect: bool,
    pub color: bool,
    pub image: bool,
    pub forwarder: bool,
}

impl Default for ComponentState {
    fn default() -> Self {
        Self {
            led_device: true,
            smoothing: true,
            hdr: true,
            video: true,
            audio: true,
            effect: true,
            color: true,
            image: true,
            forwarder: true,
        }
    }
}

impl ComponentState {
    fn set(&mut self, kind: ComponentKind, enabled: bool) {
        match kind {
            ComponentKind::All => {
                self.led_device = enabled;
                self.smoothing = enabled;
                self.hdr = enabled;
                self.video = enabled;
                self.audio = enabled;
                self.effect = enabled;
                self.color = enabled;
                self.image = enabled;
                self.forwarder = enabled;
            }
            ComponentKind::LedDevice => self.led_device = enabled,
            ComponentKind::Smoothing => self.smoothing = enabled,
            ComponentKind::Hdr => self.hdr = enabled,
            ComponentKind::Video => self.video = enabled,
            ComponentKind::Audio => self.audio = enabled,
            ComponentKind::Effect => self.effect = enabled,
            ComponentKind::Color => self.color = enabled,
            ComponentKind::Image => self.image = enabled,
            ComponentKind::Forwarder => self.forwarder = enabled,
        }
    }

    pub fn get(&self, kind: ComponentKind) -> bool {
        match kind {
            ComponentKind::All => {
                self.led_device
                    && self.smoothing
                    && self.hdr
                    && self.video
                    && self.audio
                    && self.effect
                    && self.color
                    && self.image
                    && self.forwarder
            }
            ComponentKind::LedDevice => self.led_device,
            ComponentKind::Smoothing => self.smoothing,
            ComponentKind::Hdr => self.hdr,
            ComponentKind::Video => self.video,
            ComponentKind::Audio => self.audio,
            ComponentKind::Effect => self.effect,
            ComponentKind::Color => self.color,
            ComponentKind::Image => self.image,
            ComponentKind::Forwarder => self.forwarder,
        }
    }
}

/// A snapshot of one priority entry, for `getPriorityInfo`/`getActivePriorities`.
#[derive(Clone, Debug, PartialEq)]
pub struct PriorityInfo {
    pub priority: u8,
    pub kind: SourceKind,
    pub origin: String,
    pub owner: String,
    pub active: bool,
    pub visible: bool,
}

/// A request routed through the instance's source-event channel (spec.md
/// §5: "a bounded `mpsc::Receiver<SourceEvent>` fed by the arbitrator's
/// registered sources").
#[derive(Clone, Debug)]
pub enum SourceEvent {
    SetColor { priority: u8, colors: Vec<Rgb8>, timeout_ms: i64, origin: String },
    SetImage { priority: u8, image: Image, timeout_ms: i64 },
    Clear { priority: u8 },
    ClearAll { force: bool },
}

/// Channel capacity for the source-event queue; the producer side uses
/// `try_send` and drops the new frame on a full channel rather than
/// blocking the capture thread (spec.md §5 "Coroutine/async emission").
const SOURCE_CHANNEL_CAPACITY: usize = 8;

/// One ambient-lighting instance: the whole `sources -> arbitrator ->
/// reducer -> calibrator -> smoother -> driver -> hardware` pipeline for one
/// LED output.
pub struct Instance {
    clock: Box<dyn Clock>,
    layout: Layout,
    arbitrator: Arbitrator,
    reducer: Reducer,
    calibrator: Calibrator,
    smoother: Smoother,
    driver: Option<DriverHandle>,
    device_config: DeviceConfig,
    pacing: PacingConfig,
    components: ComponentState,
    capture_width: usize,
    capture_height: usize,
    current_visible: u8,
}

impl Instance {
    /// Builds an instance with the system clock; `device_type` is looked up
    /// in `registry` (empty string disables the driver, e.g. for tests that
    /// only exercise arbitration/smoothing).
    pub fn new(
        layout: Layout,
        default_calibration: Calibration,
        reducer_policy: ReducerPolicy,
        capture_width: usize,
        capture_height: usize,
        smoothing_config: SmoothingConfig,
        device_config: DeviceConfig,
        device_type: &str,
        pacing: PacingConfig,
        registry: &DriverRegistry,
    ) -> Result<Self, CoreError> {
        let led_count = layout.led_count();
        let reducer = Reducer::new(reducer_policy, led_count > 0, &layout, capture_width, capture_height);
        let calibrator = Calibrator::new(default_calibration);
        let smoother = Smoother::new(smoothing_config, led_count);

        let driver = if device_type.is_empty() {
            None
        } else {
            let device = registry.create(device_type)?;
            let mut handle = DriverHandle::new(device, device_config.led_count);
            handle.start(&device_config)?;
            Some(handle)
        };

        Ok(Self {
            clock: Box::new(SystemClock),
            layout,
            arbitrator: Arbitrator::new(),
            reducer,
            calibrator,
            smoother,
            driver,
            device_config,
            pacing,
            components: ComponentState::default(),
            capture_width,
            capture_height,
            current_visible: NO_SOURCE_PRIORITY,
        })
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // -- control surface (spec.md §6) ---------------------------------

    pub fn set_color(&mut self, priority: u8, colors: &[Rgb8], timeout_ms: i64, origin: impl Into<String>) -> Result<(), CoreError> {
        if !self.components.color {
            return Ok(());
        }
        let led_count = self.layout.led_count();
        self.arbitrator
            .register(priority, SourceKind::Color, origin, "external", None)?;
        self.arbitrator
            .set_color(self.clock.as_ref(), priority, colors, timeout_ms, led_count)?;
        self.recompute_frame();
        Ok(())
    }

    pub fn set_image(&mut self, priority: u8, image: Image, timeout_ms: i64) -> Result<(), CoreError> {
        if !self.components.image {
            return Ok(());
        }
        self.arbitrator
            .set_image(self.clock.as_ref(), priority, image, timeout_ms)?;
        self.recompute_frame();
        Ok(())
    }

    pub fn register_source(&mut self, priority: u8, kind: SourceKind, origin: impl Into<String>, owner: impl Into<String>) -> Result<(), CoreError> {
        self.arbitrator.register(priority, kind, origin, owner, None)?;
        Ok(())
    }

    pub fn clear(&mut self, priority: u8) -> Result<(), CoreError> {
        self.arbitrator.clear(priority)?;
        self.recompute_frame();
        Ok(())
    }

    pub fn clear_all(&mut self, force: bool) {
        self.arbitrator.clear_all(force);
        self.recompute_frame();
    }

    pub fn set_component_state(&mut self, kind: ComponentKind, enabled: bool) {
        self.components.set(kind, enabled);
        if kind == ComponentKind::LedDevice || kind == ComponentKind::All {
            if let Some(driver) = self.driver.as_mut() {
                let result = if enabled { driver.switch_on() } else { driver.switch_off() };
                let _ = result;
            }
        }
        if kind == ComponentKind::Smoothing || kind == ComponentKind::All {
            self.smoother.set_enabled(enabled);
        }
    }

    pub fn set_visible_priority(&mut self, priority: Option<u8>) {
        self.arbitrator.set_visible_priority(priority);
        self.recompute_frame();
    }

    pub fn set_auto_select(&mut self, enabled: bool) {
        self.arbitrator.set_auto_select(enabled);
        self.recompute_frame();
    }

    /// Final path into the driver: writes an already-produced per-LED color
    /// vector straight through, bypassing arbitration/reduction (spec.md
    /// §6 "`updateLeds(vector<Rgb>)` — final path into the driver").
    pub fn update_leds(&mut self, colors: &[Rgb8]) -> Result<(), CoreError> {
        if !self.components.led_device {
            return Ok(());
        }
        let permuted = self.permute_for_wire(colors);
        if let Some(driver) = self.driver.as_mut() {
            driver.write(&permuted)?;
        }
        Ok(())
    }

    // -- queries ---------------------------------------------------------

    pub fn get_active_priorities(&self) -> Vec<u8> {
        (0..=NO_SOURCE_PRIORITY)
            .filter(|p| self.arbitrator.entry(*p).is_some())
            .collect()
    }

    pub fn get_priority_info(&self, priority: u8) -> Option<PriorityInfo> {
        let entry = self.arbitrator.entry(priority)?;
        Some(PriorityInfo {
            priority,
            kind: entry.kind,
            origin: entry.origin.clone(),
            owner: entry.owner.clone(),
            active: !entry.inactive,
            visible: priority == self.current_visible,
        })
    }

    pub fn get_current_priority(&self) -> u8 {
        self.current_visible
    }

    pub fn get_all_components(&self) -> ComponentState {
        self.components
    }

    // -- internal pipeline -------------------------------------------------

    /// Recomputes the visible frame after any arbitrator mutation and feeds
    /// the result into the smoother as a new target (spec.md pipeline:
    /// `Arbitrator -> Reducer -> Calibrator -> Smoother`).
    fn recompute_frame(&mut self) {
        let notifications = self.arbitrator.poll(self.clock.as_ref());
        self.current_visible = self.arbitrator.visible_priority(self.clock.as_ref());

        for notification in &notifications {
            if *notification == Notification::DeviceOff {
                if let Some(driver) = self.driver.as_mut() {
                    let _ = driver.switch_off();
                }
                return;
            }
        }

        let Some(entry) = self.arbitrator.entry(self.current_visible) else {
            return;
        };

        let led_count = self.layout.led_count();
        let reduced: Vec<Rgb8> = match &entry.payload {
            Payload::None => vec![Rgb8::BLACK; led_count],
            Payload::Colors(colors) => colors.clone(),
            Payload::Image(image) => {
                if self.reducer.needs_rebuild(&self.layout, self.capture_width, self.capture_height) {
                    self.reducer.rebuild(&self.layout, self.capture_width, self.capture_height);
                }
                self.reducer.reduce(image, &self.layout)
            }
        };

        let calibration_ids: Vec<Option<u32>> = self.layout.leds.iter().map(|l| l.calibration_id).collect();
        let calibrated = self.calibrator.calibrate_linear(&reduced, &calibration_ids);

        self.smoother.set_target(self.clock.as_ref(), &calibrated);
    }

    /// Permutes each LED's bytes into hardware wire order using the
    /// calibration assigned to it, immediately before the driver write
    /// (spec.md §4.3 step 5, run last in the pipeline per spec.md's
    /// `Calibrator -> Smoother -> Driver` ordering).
    fn permute_for_wire(&self, colors: &[Rgb8]) -> Vec<Rgb8> {
        colors
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let calibration_id = self.layout.leds.get(i).and_then(|l| l.calibration_id);
                let order = self.calibrator.calibration_for(calibration_id).color_order;
                let (r, g, b) = order.permute(*c);
                Rgb8::new(r, g, b)
            })
            .collect()
    }

    /// One master-clock tick: advance the smoother and, if it produced a new
    /// frame, write it to the driver.
    pub fn tick(&mut self) -> Result<(), CoreError> {
        if let Some(frame) = self.smoother.tick(self.clock.as_ref()) {
            if self.components.led_device {
                let permuted = self.permute_for_wire(&frame);
                if let Some(driver) = self.driver.as_mut() {
                    driver.write(&permuted)?;
                } else {
                    // No driver attached: accept the tick as a no-op, used by
                    // arbitration/smoothing-only tests and demos.
                }
            }
        }
        Ok(())
    }

    /// Runs the event loop until `events` closes: a `tokio::select!` over
    /// inbound source events and the smoother's master-clock tick, matching
    /// `alixinne-hyperion.rs`'s `Instance::run` shape (spec.md §5).
    pub async fn run(mut self, mut events: mpsc::Receiver<SourceEvent>) -> Result<(), CoreError> {
        let mut tick_interval = tokio::time::interval(Duration::from_millis(self.pacing.effective_interval_ms().max(1) as u64));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(SourceEvent::SetColor { priority, colors, timeout_ms, origin }) => {
                            self.set_color(priority, &colors, timeout_ms, origin)?;
                        }
                        Some(SourceEvent::SetImage { priority, image, timeout_ms }) => {
                            self.set_image(priority, image, timeout_ms)?;
                        }
                        Some(SourceEvent::Clear { priority }) => {
                            self.clear(priority)?;
                        }
                        Some(SourceEvent::ClearAll { force }) => {
                            self.clear_all(force);
                        }
                        None => return Ok(()),
                    }
                }
                _ = tick_interval.tick() => {
                    self.tick()?;
                }
            }
        }
    }
}

/// Bounded sender side of an instance's event channel, for capture threads
/// to push frames into (spec.md §5: producer uses `try_send`, dropping the
/// new frame on a full queue rather than blocking).
pub fn new_source_channel() -> (mpsc::Sender<SourceEvent>, mpsc::Receiver<SourceEvent>) {
    mpsc::channel(SOURCE_CHANNEL_CAPACITY)
}

/// Pushes an event without blocking; drops it if the channel is full — the
/// LED cadence is authoritative, not the source cadence (spec.md §9).
pub fn try_push(tx: &mpsc::Sender<SourceEvent>, event: SourceEvent) {
    if tx.try_send(event).is_err() {
        log::warn!("source event dropped, instance backlog full");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::color::ColorOrder;
    use crate::layout::{LedDescriptor, LedRect};

    fn one_led_layout() -> Layout {
        Layout::new(vec![LedDescriptor::new(LedRect { min_x: 0.0, max_x: 1.0, min_y: 0.0, max_y: 1.0 })])
    }

    fn test_instance() -> Instance {
        let layout = one_led_layout();
        let registry = DriverRegistry::new();
        Instance::new(
            layout,
            Calibration::default(),
            ReducerPolicy::Mean,
            4,
            4,
            SmoothingConfig { settling_time_ms: 0, ..SmoothingConfig::default() },
            DeviceConfig { led_count: 1, params: serde_json::json!({}) },
            "",
            PacingConfig { user_refresh_ms: 40, device_forced_ms: None, smoother_interval_ms: 0 },
            &registry,
        )
        .unwrap()
        .with_clock(Box::new(TestClock::new(0)))
    }

    #[test]
    fn set_color_updates_current_priority() {
        let mut instance = test_instance();
        instance.set_color(100, &[Rgb8::new(255, 0, 0)], 0, "test").unwrap();
        assert_eq!(instance.get_current_priority(), 100);
        let info = instance.get_priority_info(100).unwrap();
        assert!(info.visible);
        assert_eq!(info.kind, SourceKind::Color);
    }

    #[test]
    fn clear_reverts_to_no_source() {
        let mut instance = test_instance();
        instance.set_color(100, &[Rgb8::new(1, 1, 1)], 0, "test").unwrap();
        instance.clear(100).unwrap();
        assert_eq!(instance.get_current_priority(), NO_SOURCE_PRIORITY);
    }

    #[test]
    fn disabling_color_component_suppresses_set_color() {
        let mut instance = test_instance();
        instance.set_component_state(ComponentKind::Color, false);
        instance.set_color(100, &[Rgb8::new(1, 1, 1)], 0, "test").unwrap();
        assert!(instance.get_priority_info(100).is_none());
    }

    #[test]
    fn tick_without_driver_is_a_harmless_noop() {
        let mut instance = test_instance();
        instance.set_color(100, &[Rgb8::new(10, 20, 30)], 0, "test").unwrap();
        instance.tick().unwrap();
    }

    #[test]
    fn get_all_components_defaults_enabled() {
        let instance = test_instance();
        assert!(instance.get_all_components().get(ComponentKind::LedDevice));
    }

    #[test]
    fn permute_for_wire_respects_default_calibration_color_order() {
        let mut instance = test_instance();
        instance.calibrator = Calibrator::new(Calibration { color_order: ColorOrder::Bgr, ..Calibration::default() });
        let permuted = instance.permute_for_wire(&[Rgb8::new(10, 20, 30)]);
        assert_eq!(permuted[0], Rgb8::new(30, 20, 10));
    }

    struct RecordingDevice {
        last: std::sync::Arc<std::sync::Mutex<Vec<(u8, u8, u8)>>>,
    }

    impl crate::driver::LedDevice for RecordingDevice {
        fn init(&mut self, _config: &DeviceConfig) -> Result<(), crate::driver::DriverError> {
            Ok(())
        }
        fn open(&mut self) -> Result<(), crate::driver::DriverError> {
            Ok(())
        }
        fn update_leds(&mut self, colors: &[(u8, u8, u8)]) -> Result<i32, crate::driver::DriverError> {
            *self.last.lock().unwrap() = colors.to_vec();
            Ok((colors.len() * 3) as i32)
        }
        fn led_count(&self) -> usize {
            self.last.lock().unwrap().len().max(1)
        }
        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn four_led_layout() -> Layout {
        Layout::new(vec![
            LedDescriptor::new(LedRect { min_x: 0.0, max_x: 0.25, min_y: 0.0, max_y: 1.0 }),
            LedDescriptor::new(LedRect { min_x: 0.25, max_x: 0.5, min_y: 0.0, max_y: 1.0 }),
            LedDescriptor::new(LedRect { min_x: 0.5, max_x: 0.75, min_y: 0.0, max_y: 1.0 }),
            LedDescriptor::new(LedRect { min_x: 0.75, max_x: 1.0, min_y: 0.0, max_y: 1.0 }),
        ])
    }

    /// spec.md §8 S1: a solid red `setColor` at priority 100 with identity
    /// calibration writes `FF 00 00` four times over; `clear(100)` then
    /// writes all-black.
    #[test]
    fn solid_color_then_clear_matches_spec_s1_wire_frame() {
        let last = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let last_clone = last.clone();
        let mut registry = DriverRegistry::new();
        registry.register("recording", move || {
            Box::new(RecordingDevice { last: last_clone.clone() }) as Box<dyn crate::driver::LedDevice>
        });

        let mut instance = Instance::new(
            four_led_layout(),
            Calibration::default(),
            ReducerPolicy::Mean,
            4,
            4,
            SmoothingConfig { settling_time_ms: 0, ..SmoothingConfig::default() },
            DeviceConfig { led_count: 4, params: serde_json::json!({}) },
            "recording",
            PacingConfig { user_refresh_ms: 40, device_forced_ms: None, smoother_interval_ms: 0 },
            &registry,
        )
        .unwrap()
        .with_clock(Box::new(TestClock::new(0)));

        instance.set_color(100, &[Rgb8::new(255, 0, 0)], -1, "test").unwrap();
        instance.tick().unwrap();
        assert_eq!(*last.lock().unwrap(), vec![(255, 0, 0); 4]);

        instance.clear(100).unwrap();
        instance.tick().unwrap();
        assert_eq!(*last.lock().unwrap(), vec![(0, 0, 0); 4]);
    }

    /// A `SetColor` pushed through the instance's event channel reaches the
    /// driver on the next master-clock tick (spec.md §5 event-loop shape).
    #[tokio::test]
    async fn run_delivers_set_color_events_to_the_driver() {
        let last = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let last_clone = last.clone();
        let mut registry = DriverRegistry::new();
        registry.register("recording", move || {
            Box::new(RecordingDevice { last: last_clone.clone() }) as Box<dyn crate::driver::LedDevice>
        });

        let instance = Instance::new(
            one_led_layout(),
            Calibration::default(),
            ReducerPolicy::Mean,
            4,
            4,
            SmoothingConfig { settling_time_ms: 0, ..SmoothingConfig::default() },
            DeviceConfig { led_count: 1, params: serde_json::json!({}) },
            "recording",
            PacingConfig { user_refresh_ms: 5, device_forced_ms: None, smoother_interval_ms: 0 },
            &registry,
        )
        .unwrap();

        let (tx, rx) = new_source_channel();
        let handle = tokio::spawn(instance.run(rx));

        try_push(&tx, SourceEvent::SetColor { priority: 10, colors: vec![Rgb8::new(9, 8, 7)], timeout_ms: -1, origin: "test".into() });
        tokio::time::sleep(Duration::from_millis(40)).await;
        drop(tx);
        let _ = handle.await;

        assert_eq!(*last.lock().unwrap(), vec![(9, 8, 7)]);
    }
}
