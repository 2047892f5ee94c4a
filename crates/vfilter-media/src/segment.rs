//! Lossless splitting, concatenation and segment removal.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use vfilter_models::ChunkSpan;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::remove_if_exists;
use crate::progress::TransformProgress;

/// `<stem>_chunk_<index:03>.<ext>`
pub fn chunk_file_name(source: &Path, index: usize) -> String {
    let stem = source.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".to_string());
    format!("{}_chunk_{:03}.{}", stem, index, ext)
}

/// Stream-copy `[start, start + duration)` of `input` into `output`.
pub async fn extract_segment(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    start: f64,
    duration: f64,
    operation: &str,
    timeout_secs: u64,
) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(input.as_ref(), output.as_ref())
        .seek(start)
        .duration(duration)
        .codec_copy()
        .avoid_negative_ts();

    FfmpegRunner::new(operation)
        .with_timeout(timeout_secs)
        .run_to_output(&cmd, &TransformProgress::none())
        .await
}

/// Split `video` into one stream-copied file per span, in span order.
///
/// Either every chunk is written or none is left behind.
pub async fn split_video(
    video: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    spans: &[ChunkSpan],
    timeout_per_chunk_secs: u64,
    progress: &TransformProgress,
) -> MediaResult<Vec<PathBuf>> {
    let video = video.as_ref();
    let output_dir = output_dir.as_ref();
    tokio::fs::create_dir_all(output_dir).await?;

    info!("Splitting video into {} chunks...", spans.len());

    let mut chunk_paths = Vec::with_capacity(spans.len());
    for span in spans {
        let chunk_path = output_dir.join(chunk_file_name(video, span.index));
        let operation = format!("Chunk {} creation", span.index);

        if let Err(e) = extract_segment(
            video,
            &chunk_path,
            span.start,
            span.duration(),
            &operation,
            timeout_per_chunk_secs,
        )
        .await
        {
            discard(&chunk_paths).await;
            return Err(e);
        }

        debug!("Created chunk {}/{}: {}", span.index + 1, spans.len(), chunk_path.display());
        chunk_paths.push(chunk_path);
        progress.report(((chunk_paths.len() * 100) / spans.len().max(1)) as u8);
    }

    info!("Split video into {} chunks", chunk_paths.len());
    Ok(chunk_paths)
}

/// Escape a path for a concat demuxer `file '...'` line.
fn concat_list_entry(path: &Path) -> String {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let escaped = abs.to_string_lossy().replace('\\', "/").replace('\'', r"'\''");
    format!("file '{}'\n", escaped)
}

/// Join `inputs` in the given order without re-encoding.
pub async fn concatenate_videos(
    inputs: &[PathBuf],
    output: impl AsRef<Path>,
    timeout_secs: u64,
    progress: &TransformProgress,
) -> MediaResult<PathBuf> {
    let output = output.as_ref();
    if inputs.is_empty() {
        return Err(MediaError::ffmpeg_failed("No video files to concatenate", None, None));
    }

    info!("Concatenating {} video chunks...", inputs.len());

    let stem = output.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let list_path = output.with_file_name(format!("{}_concat_list.txt", stem));
    let list: String = inputs.iter().map(|p| concat_list_entry(p)).collect();
    tokio::fs::write(&list_path, list).await?;

    let cmd = FfmpegCommand::new(&list_path, output)
        .input_args(["-f", "concat", "-safe", "0"])
        .codec_copy();

    let result = FfmpegRunner::new("Video concatenation")
        .with_timeout(timeout_secs)
        .run_to_output(&cmd, progress)
        .await;

    if let Err(e) = remove_if_exists(&list_path).await {
        warn!("Failed to remove concat list {}: {}", list_path.display(), e);
    }
    result?;

    info!("Concatenated videos to {}", output.display());
    Ok(output.to_path_buf())
}

/// Complement of `remove` within `[0, total_duration)`.
pub fn keep_ranges(remove: &[(f64, f64)], total_duration: f64) -> Vec<(f64, f64)> {
    let mut remove = remove.to_vec();
    remove.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut keep = Vec::new();
    let mut cursor = 0.0_f64;
    for (start, end) in remove {
        if cursor < start {
            keep.push((cursor, start.min(total_duration)));
        }
        cursor = cursor.max(end);
    }
    if cursor < total_duration {
        keep.push((cursor, total_duration));
    }
    keep.retain(|(s, e)| e > s);
    keep
}

/// Drop the given time ranges from `video` by stream-copying and joining the rest.
///
/// Library entry point; the music-removal pipeline does not call it.
pub async fn remove_segments(
    video: impl AsRef<Path>,
    output: impl AsRef<Path>,
    remove: &[(f64, f64)],
    total_duration: f64,
    temp_dir: impl AsRef<Path>,
    segment_timeout_secs: u64,
    concat_timeout_secs: u64,
) -> MediaResult<PathBuf> {
    let (video, output, temp_dir) = (video.as_ref(), output.as_ref(), temp_dir.as_ref());

    if remove.is_empty() {
        warn!("No segments to remove, copying streams");
        let cmd = FfmpegCommand::new(video, output).codec_copy();
        FfmpegRunner::new("Segment copy")
            .with_timeout(concat_timeout_secs)
            .run_to_output(&cmd, &TransformProgress::none())
            .await?;
        return Ok(output.to_path_buf());
    }

    let keep = keep_ranges(remove, total_duration);
    if keep.is_empty() {
        return Err(MediaError::invalid_media("All segments would be removed, no output possible"));
    }

    info!("Removing {} segments, keeping {} segments", remove.len(), keep.len());
    tokio::fs::create_dir_all(temp_dir).await?;

    let mut segments = Vec::with_capacity(keep.len());
    for (i, (start, end)) in keep.iter().enumerate() {
        let segment = temp_dir.join(format!("segment_{:03}.{}", i, extension_of(video)));
        let operation = format!("Segment {} extraction", i);
        if let Err(e) = extract_segment(video, &segment, *start, end - start, &operation, segment_timeout_secs).await {
            discard(&segments).await;
            return Err(e);
        }
        segments.push(segment);
    }

    let kept: f64 = keep.iter().map(|(s, e)| e - s).sum();
    let result = concatenate_videos(&segments, output, concat_timeout_secs, &TransformProgress::none()).await;
    discard(&segments).await;
    result?;

    info!(
        "Removed {:.1}s of content. Final duration: {:.1}s (was {:.1}s)",
        total_duration - kept,
        kept,
        total_duration
    );
    Ok(output.to_path_buf())
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".to_string())
}

async fn discard(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = remove_if_exists(path).await {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_file_name() {
        assert_eq!(chunk_file_name(Path::new("/in/talk.mkv"), 7), "talk_chunk_007.mkv");
        assert_eq!(chunk_file_name(Path::new("raw"), 0), "raw_chunk_000.mp4");
    }

    #[test]
    fn test_concat_entry_escapes_quotes() {
        let entry = concat_list_entry(Path::new("/tmp/it's.mp4"));
        assert_eq!(entry, "file '/tmp/it'\\''s.mp4'\n");
    }

    #[test]
    fn test_keep_ranges() {
        let keep = keep_ranges(&[(50.0, 60.0), (10.0, 20.0)], 100.0);
        assert_eq!(keep, vec![(0.0, 10.0), (20.0, 50.0), (60.0, 100.0)]);
    }

    #[test]
    fn test_keep_ranges_overlapping_and_edges() {
        let keep = keep_ranges(&[(0.0, 15.0), (10.0, 30.0), (90.0, 120.0)], 100.0);
        assert_eq!(keep, vec![(30.0, 90.0)]);
        assert!(keep_ranges(&[(0.0, 100.0)], 100.0).is_empty());
    }

    #[tokio::test]
    async fn test_concatenate_rejects_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = concatenate_videos(&[], dir.path().join("out.mp4"), 10, &TransformProgress::none()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_remove_everything_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("out.mp4");
        let err = remove_segments(dir.path().join("in.mp4"), &output, &[(0.0, 120.0)], 100.0, dir.path(), 10, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidMedia(_)));
        assert!(!output.exists());
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use crate::testing::FakeFfmpeg;
        use vfilter_models::chunk::chunk_boundaries;

        #[tokio::test]
        async fn test_split_failure_leaves_no_chunks() {
            let fake = FakeFfmpeg::install(
                r#"case "$OUT" in
  *_chunk_001.*) echo partial > "$OUT"; echo 'Invalid data found when processing input' >&2; exit 1 ;;
esac
echo chunk > "$OUT""#,
            )
            .await;
            let chunks_dir = fake.dir().join("chunks");
            let spans = chunk_boundaries(2700.0, 900.0);
            assert_eq!(spans.len(), 3);

            let err = split_video(fake.dir().join("talk.mp4"), &chunks_dir, &spans, 10, &TransformProgress::none())
                .await
                .unwrap_err();
            assert!(err.to_string().contains("Chunk 1 creation failed"));
            assert_eq!(err.diagnostics(), Some("Invalid data found when processing input"));
            let leftover: Vec<_> = std::fs::read_dir(&chunks_dir).unwrap().collect();
            assert!(leftover.is_empty(), "{:?}", leftover);
        }

        #[tokio::test]
        async fn test_split_timeout_leaves_no_chunks() {
            let fake = FakeFfmpeg::install(
                r#"case "$OUT" in
  *_chunk_002.*) echo partial > "$OUT"; exec sleep 30 ;;
esac
echo chunk > "$OUT""#,
            )
            .await;
            let chunks_dir = fake.dir().join("chunks");
            let spans = chunk_boundaries(2700.0, 900.0);

            let err = split_video(fake.dir().join("talk.mp4"), &chunks_dir, &spans, 1, &TransformProgress::none())
                .await
                .unwrap_err();
            assert!(err.is_timeout());
            assert!(std::fs::read_dir(&chunks_dir).unwrap().next().is_none());
        }

        #[tokio::test]
        async fn test_remove_nothing_failure_leaves_no_output() {
            let fake = FakeFfmpeg::install("echo partial > \"$OUT\"\nexit 1").await;
            let output = fake.dir().join("trimmed.mp4");

            let err = remove_segments(fake.dir().join("in.mp4"), &output, &[], 100.0, fake.dir(), 10, 10)
                .await
                .unwrap_err();
            assert!(matches!(err, MediaError::FfmpegFailed { .. }));
            assert!(!output.exists());
        }
    }
}
