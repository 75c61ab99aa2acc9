#![deny(unreachable_patterns)]
//! Media layer for the video generation pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with cancellation and timeouts
//! - FFprobe inspection
//! - Idempotent material downloads with validation
//! - Clip packing (normalization, transitions, looping, single-pass concat)
//! - Final composition with narration, music and subtitles
//! - Subtitle splitting, alignment and correction

pub mod command;
pub mod compose;
pub mod download;
pub mod error;
pub mod filters;
pub mod packer;
pub mod preprocess;
pub mod probe;
pub mod subtitle;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegProgress, FfmpegRunner};
pub use compose::{compose_final, ComposeRequest, SubtitleStyle};
pub use download::{url_hash, CachedMaterial, MaterialDownloader};
pub use error::{MediaError, MediaResult};
pub use filters::{normalize_filter, SlideSide, Transition};
pub use packer::{
    clip_count, plan_segments, target_duration, ClipPacker, FfmpegSegmentEncoder, PackOptions,
    PackReport, PlannedSegment, SegmentEncoder,
};
pub use preprocess::preprocess_local;
pub use probe::{probe_duration, probe_video, VideoInfo};
pub use subtitle::{
    align_forward, correct_subtitle_file, correct_subtitles, split_sentences,
    write_aligned_subtitles,
};
