//! skill-scan - Camera region text recognition and skill matching
//!
//! Samples a selected region of a live camera feed, binarizes it, runs it
//! through a text-recognition engine and matches the text against two closed
//! label vocabularies. An auto-capture loop samples on a timer and records
//! the first confident result exactly once.

pub mod auto_capture;
pub mod capture;
pub mod config;
pub mod matching;
pub mod pipeline;
pub mod shared;
pub mod storage;
pub mod vision;
