//! Real-time core of an ambient-lighting engine.
//!
//! An [`Instance`](supervisor::Instance) wires together five components —
//! [`arbitrator`], [`reducer`], [`calibrator`], [`smoothing`] and [`driver`] —
//! into the pipeline `sources -> arbitrator -> reducer -> calibrator ->
//! smoother -> driver -> hardware`. Everything outside that pipeline
//! (capture, persistence, front-ends, authentication, effect scripting) is
//! an external collaborator and lives outside this crate.

pub mod arbitrator;
pub mod calibrator;
pub mod clock;
pub mod color;
pub mod driver;
pub mod error;
pub mod image;
pub mod layout;
pub mod reducer;
pub mod settings;
pub mod smoothing;
pub mod supervisor;

pub use color::{ColorOrder, Rgb8};
pub use error::CoreError;
pub use image::Image;
pub use layout::{LedDescriptor, Layout};
