//! DPCTF QR crate - translation of decoded QR payloads into timeline events.
//!
//! Pixel recognition happens outside this crate. Here each recognized
//! payload string is classified as a mezzanine timestamp, a test-runner
//! status report or a pre-test marker, and converted into the typed events
//! defined in `dpctf-core`.

pub mod error;
pub mod frame_rate;
pub mod translator;

pub use error::QrError;
pub use frame_rate::parse_frame_rate;
pub use translator::{DecodedQr, QrTranslator};
