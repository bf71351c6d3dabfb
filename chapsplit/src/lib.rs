//! # chapsplit
//!
//! Turns the chapters of a remote video (or the entries of a playlist) into
//! individually tagged MP3 tracks, and batch-normalizes the loudness of a
//! directory of MP3 files.
//!
//! The library is organised leaf-first:
//!
//! - [`domain`]: immutable work items, outcomes and loudness values
//! - [`gateway`]: the Media Transform Gateway over ffmpeg and ID3 tags
//! - [`source`]: remote metadata and asset retrieval through yt-dlp
//! - [`pipeline`]: the batch controller and the directory scan pipeline,
//!   both fanning out through [`pipeline_common::WorkerPool`]
//!
//! [`config`] and [`logging`] carry the ambient setup shared with the CLI.

pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod pipeline;
pub mod source;
pub mod utils;

pub use error::{Error, Result};
