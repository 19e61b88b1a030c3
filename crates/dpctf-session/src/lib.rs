//! DPCTF Session crate - frame-stream processing of one recorded session.
//!
//! Reads per-frame QR detections from a [`FrameSource`], deduplicates them
//! into per-test event lists, finalizes each test through its observation
//! handler and hands the results to a [`ResultSink`].

pub mod processor;
pub mod results;
pub mod source;

pub use processor::{AudioInputs, FrameStreamProcessor, SessionSummary};
pub use results::{FileResultSink, MemoryResultSink, PostedResults, ResultSink};
pub use source::{CaptureFrame, Detection, FrameSource, JsonLinesSource, VecSource};
