//! Clip packing: turn source materials into one video covering a target duration.
//!
//! Packing is split in two phases:
//! 1. Planning (pure): order candidates, cut them into windows no longer than the
//!    maximum clip duration and pick a transition per segment.
//! 2. Encoding: every planned segment is normalized and encoded into a temporary
//!    directory through a [`SegmentEncoder`], then all intermediates are joined in
//!    a single concat pass. Segments that fail to encode are skipped; if the
//!    successes do not cover the target they are cycled. Coverage is counted
//!    from the encoded length, which can fall short of the plan when a source
//!    is shorter than its metadata claims.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use vgen_models::{ConcatMode, EncodingConfig, MaterialInfo, TransitionMode, VideoSegment};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters::{normalize_filter, segment_graph, Transition};
use crate::probe::{probe_duration, probe_video};

/// Durations closer than this are treated as equal.
const EPSILON: f64 = 1e-3;

/// Total duration the materials must cover for `video_count` outputs.
pub fn target_duration(audio_duration: f64, video_count: u32) -> f64 {
    audio_duration * video_count.max(1) as f64
}

/// Number of segments needed to cover `target` seconds.
pub fn clip_count(target: f64, max_clip: f64) -> usize {
    if target <= 0.0 || max_clip <= 0.0 {
        return 0;
    }
    (target / max_clip).ceil() as usize
}

/// A segment chosen by the planner, with its transition.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSegment {
    pub segment: VideoSegment,
    pub transition: Option<Transition>,
}

/// One line of the concat list.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatEntry {
    pub path: PathBuf,
    /// Seconds of the file to use
    pub duration: f64,
    /// Whether only the first `duration` seconds of a longer file are used
    pub trimmed: bool,
}

/// Outcome of a packing pass.
#[derive(Debug, Clone)]
pub struct PackReport {
    pub output: PathBuf,
    /// Segments the planner asked for
    pub planned: usize,
    pub encoded: usize,
    pub skipped: usize,
    /// Entries that reuse an already encoded segment
    pub looped: usize,
    /// Seconds covered by the concat list
    pub duration: f64,
}

/// Planning knobs for a packing pass.
#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Output frame size
    pub resolution: (u32, u32),
    /// Longest segment in seconds
    pub max_clip_duration: f64,
    pub concat_mode: ConcatMode,
    pub transition_mode: TransitionMode,
}

/// Order materials so consecutive candidates come from different search terms.
///
/// Materials keep their relative order inside a term; terms appear in the order
/// they were first seen. Materials without a term share one group.
pub fn interleave_by_term(materials: &[MaterialInfo]) -> Vec<MaterialInfo> {
    let mut order: Vec<Option<&str>> = Vec::new();
    let mut groups: HashMap<Option<&str>, Vec<&MaterialInfo>> = HashMap::new();

    for material in materials {
        let key = material.search_term.as_deref();
        if !groups.contains_key(&key) {
            order.push(key);
        }
        groups.entry(key).or_default().push(material);
    }

    let longest = groups.values().map(Vec::len).max().unwrap_or(0);
    let mut result = Vec::with_capacity(materials.len());
    for round in 0..longest {
        for key in &order {
            if let Some(m) = groups.get(key).and_then(|g| g.get(round)) {
                result.push((*m).clone());
            }
        }
    }
    result
}

/// Cut a material into windows no longer than `max_clip`.
///
/// Sequential mode keeps only the first window.
fn windows(material: &MaterialInfo, max_clip: f64, mode: ConcatMode) -> Vec<VideoSegment> {
    let Some(path) = material.local_path.as_ref() else {
        return Vec::new();
    };
    let end = material.start_time + material.duration;
    let mut start = material.start_time;
    let mut result = Vec::new();

    while end - start > EPSILON {
        let len = max_clip.min(end - start);
        result.push(VideoSegment::new(path.clone(), start, len));
        start += len;
        if mode == ConcatMode::Sequential {
            break;
        }
    }
    result
}

/// Plan the segments for one output.
///
/// Each segment lasts `min(remaining, max_clip, source_remaining)`. The plan
/// stops as soon as the target is covered; it may fall short when the materials
/// run out, in which case encoding loops the segments it has.
pub fn plan_segments<R: Rng + ?Sized>(
    materials: &[MaterialInfo],
    target: f64,
    options: &PackOptions,
    rng: &mut R,
) -> Vec<PlannedSegment> {
    let max_clip = options.max_clip_duration.max(EPSILON);

    let mut candidates: Vec<VideoSegment> = match options.concat_mode {
        ConcatMode::Sequential => interleave_by_term(materials)
            .iter()
            .flat_map(|m| windows(m, max_clip, ConcatMode::Sequential))
            .collect(),
        ConcatMode::Random => {
            let mut shuffled = materials.to_vec();
            shuffled.shuffle(rng);
            let mut all: Vec<VideoSegment> = interleave_by_term(&shuffled)
                .iter()
                .flat_map(|m| windows(m, max_clip, ConcatMode::Random))
                .collect();
            all.shuffle(rng);
            all
        }
    };

    let mut planned = Vec::new();
    let mut covered = 0.0;
    for candidate in candidates.drain(..) {
        let remaining = target - covered;
        if remaining <= EPSILON {
            break;
        }
        let duration = candidate.duration().min(remaining);
        let segment = VideoSegment::new(
            candidate.source_path().to_path_buf(),
            candidate.start_time(),
            duration,
        );
        let mut transition = Transition::choose(options.transition_mode, rng);
        if planned.is_empty() && transition.is_some_and(|t| t.is_entry()) {
            // The opening segment never animates in
            transition = None;
        }
        covered += duration;
        planned.push(PlannedSegment {
            segment,
            transition,
        });
    }
    planned
}

/// Build the concat entries from encoded segments, cycling them until `target`
/// is covered. Returns the entries and how many of them are loop repeats.
pub fn fill_to_target(encoded: &[(PathBuf, f64)], target: f64) -> (Vec<ConcatEntry>, usize) {
    let mut entries: Vec<ConcatEntry> = encoded
        .iter()
        .map(|(path, duration)| ConcatEntry {
            path: path.clone(),
            duration: *duration,
            trimmed: false,
        })
        .collect();
    let mut covered: f64 = encoded.iter().map(|(_, d)| d).sum();
    let mut looped = 0;

    if encoded.iter().all(|(_, d)| *d <= EPSILON) {
        return (entries, looped);
    }

    for (path, duration) in encoded.iter().cycle() {
        let remaining = target - covered;
        if remaining <= EPSILON {
            break;
        }
        if *duration <= EPSILON {
            continue;
        }
        let used = duration.min(remaining);
        entries.push(ConcatEntry {
            path: path.clone(),
            duration: used,
            trimmed: used + EPSILON < *duration,
        });
        covered += used;
        looped += 1;
    }
    (entries, looped)
}

/// Render a concat demuxer list.
pub fn concat_list(entries: &[ConcatEntry]) -> String {
    let mut list = String::new();
    for entry in entries {
        let path = entry.path.to_string_lossy().replace('\'', "'\\''");
        list.push_str(&format!("file '{}'\n", path));
        if entry.trimmed {
            list.push_str(&format!("outpoint {:.3}\n", entry.duration));
        }
    }
    list
}

/// Encodes normalized segments and joins them.
#[async_trait]
pub trait SegmentEncoder: Send + Sync {
    /// Normalize, apply the transition and encode one segment to `output`.
    /// Returns the seconds actually written.
    async fn encode_segment(&self, planned: &PlannedSegment, output: &Path) -> MediaResult<f64>;

    /// Join intermediates listed in `list_file` into `output` without re-encoding.
    async fn concat(&self, list_file: &Path, output: &Path) -> MediaResult<()>;
}

/// FFmpeg-backed segment encoder.
#[derive(Debug, Clone)]
pub struct FfmpegSegmentEncoder {
    runner: FfmpegRunner,
    encoding: EncodingConfig,
    resolution: (u32, u32),
}

impl FfmpegSegmentEncoder {
    pub fn new(runner: FfmpegRunner, encoding: EncodingConfig, resolution: (u32, u32)) -> Self {
        Self {
            runner,
            encoding,
            resolution,
        }
    }
}

#[async_trait]
impl SegmentEncoder for FfmpegSegmentEncoder {
    async fn encode_segment(&self, planned: &PlannedSegment, output: &Path) -> MediaResult<f64> {
        let segment = &planned.segment;
        let info = probe_video(segment.source_path()).await?;
        let normalize = normalize_filter(info.width, info.height, self.resolution);
        let graph = segment_graph(
            &normalize,
            planned.transition,
            segment.duration(),
            self.resolution,
            self.encoding.fps,
        );

        let cmd = FfmpegCommand::new(segment.source_path(), output)
            .seek(segment.start_time())
            .duration(segment.duration())
            .filter_complex(graph)
            .map("[v]")
            .no_audio()
            .video_encoding(&self.encoding);

        self.runner.run(&cmd).await?;
        probe_duration(output).await
    }

    async fn concat(&self, list_file: &Path, output: &Path) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(list_file, output)
            .concat_list()
            .copy_streams();
        self.runner.run(&cmd).await
    }
}

/// Packs materials into a single video.
pub struct ClipPacker<E: SegmentEncoder> {
    encoder: E,
    options: PackOptions,
}

impl<E: SegmentEncoder> ClipPacker<E> {
    pub fn new(encoder: E, options: PackOptions) -> Self {
        Self { encoder, options }
    }

    pub fn options(&self) -> &PackOptions {
        &self.options
    }

    /// Build `output` covering `target` seconds from `materials`.
    ///
    /// Intermediates live in a temporary directory next to `output` that is
    /// removed whether packing succeeds or fails.
    pub async fn pack<R: Rng + Send + ?Sized>(
        &self,
        materials: &[MaterialInfo],
        target: f64,
        output: &Path,
        rng: &mut R,
    ) -> MediaResult<PackReport> {
        let expected = clip_count(target, self.options.max_clip_duration);
        let plan = plan_segments(materials, target, &self.options, rng);
        info!(
            target_secs = target,
            expected_clips = expected,
            planned = plan.len(),
            "Packing {} materials into {}",
            materials.len(),
            output.display()
        );

        if plan.is_empty() {
            return Err(MediaError::NoSegments(
                "no downloaded material to build segments from".to_string(),
            ));
        }

        let parent = output.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;
        let temp_dir = tempfile::Builder::new().prefix("pack-").tempdir_in(parent)?;

        let mut encoded: Vec<(PathBuf, f64)> = Vec::with_capacity(plan.len());
        let mut skipped = 0;
        for (i, planned) in plan.iter().enumerate() {
            let seg_path = temp_dir.path().join(format!("segment-{:03}.mp4", i));
            match self.encoder.encode_segment(planned, &seg_path).await {
                Ok(duration) if duration > EPSILON => {
                    if duration + EPSILON < planned.segment.duration() {
                        debug!(
                            "Segment {} encoded {:.3}s of {:.3}s planned",
                            i,
                            duration,
                            planned.segment.duration()
                        );
                    }
                    encoded.push((seg_path, duration));
                }
                Ok(_) => {
                    skipped += 1;
                    warn!(
                        "Skipping segment {} from {}: no frames encoded",
                        i,
                        planned.segment.source_path().display()
                    );
                }
                Err(MediaError::Cancelled) => return Err(MediaError::Cancelled),
                Err(e) => {
                    skipped += 1;
                    warn!(
                        "Skipping segment {} from {}: {}",
                        i,
                        planned.segment.source_path().display(),
                        e
                    );
                }
            }
        }

        if encoded.is_empty() {
            return Err(MediaError::NoSegments(format!(
                "all {} segments failed to encode",
                plan.len()
            )));
        }

        let (entries, looped) = fill_to_target(&encoded, target);
        if looped > 0 {
            debug!("Looping {} segment(s) to cover {:.2}s", looped, target);
        }
        let duration: f64 = entries.iter().map(|e| e.duration).sum();

        let list_path = temp_dir.path().join("concat.txt");
        tokio::fs::write(&list_path, concat_list(&entries)).await?;
        self.encoder.concat(&list_path, output).await?;

        metrics::counter!("vgen_segments_encoded_total").increment(encoded.len() as u64);
        if skipped > 0 {
            metrics::counter!("vgen_segments_skipped_total").increment(skipped as u64);
        }

        Ok(PackReport {
            output: output.to_path_buf(),
            planned: plan.len(),
            encoded: encoded.len(),
            skipped,
            looped,
            duration,
        })
    }
}
