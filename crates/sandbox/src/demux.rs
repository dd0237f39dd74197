//! Output demuxer.
//!
//! Splits the backend's framed log channel into separate stdout and stderr
//! buffers. Each buffer is capped; bytes past the cap are discarded as they
//! arrive, so a chatty program never grows the runner's memory beyond the
//! configured limit.

use futures::StreamExt;
use tokio::time::Instant;

use code_runner_core::Result;

use crate::engine::{OutputStream, StreamKind};

/// Separated, possibly truncated output of one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemuxedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes were dropped, either past a cap or because capture ran out of time.
    pub truncated: bool,
}

impl DemuxedOutput {
    /// Append up to the remaining capacity; returns false if anything was dropped.
    fn push(&mut self, kind: StreamKind, data: &[u8], cap: usize) -> bool {
        let buf = match kind {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        };
        let room = cap.saturating_sub(buf.len());
        let take = room.min(data.len());
        buf.extend_from_slice(&data[..take]);
        take == data.len()
    }

    fn full(&self, cap: usize) -> bool {
        self.stdout.len() >= cap && self.stderr.len() >= cap
    }
}

/// Drain `stream` into per-stream buffers of at most `cap` bytes each.
///
/// Frames are consumed in order, so each buffer preserves the relative
/// order of writes to its stream. If `deadline` passes before the stream
/// ends, the output gathered so far is returned marked as truncated. A
/// stream error fails with `OutputCaptureFailed`.
pub async fn demux(mut stream: OutputStream, cap: usize, deadline: Instant) -> Result<DemuxedOutput> {
    let mut output = DemuxedOutput::default();

    loop {
        let frame = match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(Some(frame)) => frame?,
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(
                    stdout_bytes = output.stdout.len(),
                    stderr_bytes = output.stderr.len(),
                    "Output capture deadline passed, returning partial output"
                );
                output.truncated = true;
                break;
            }
        };

        if !output.push(frame.kind, &frame.data, cap) {
            output.truncated = true;
        }
        // Nothing more can be kept.
        if output.truncated && output.full(cap) {
            break;
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OutputFrame;
    use code_runner_core::Error;
    use futures::stream;
    use std::time::Duration;

    fn frames(frames: Vec<OutputFrame>) -> OutputStream {
        stream::iter(frames.into_iter().map(Ok)).boxed()
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_separates_interleaved_streams() {
        let input = frames(vec![
            OutputFrame::stdout("a1 "),
            OutputFrame::stderr("e1 "),
            OutputFrame::stdout("a2"),
            OutputFrame::stderr("e2"),
        ]);
        let output = demux(input, 1024, later()).await.unwrap();
        assert_eq!(output.stdout, b"a1 a2");
        assert_eq!(output.stderr, b"e1 e2");
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn test_exact_cap_is_not_truncated() {
        let input = frames(vec![OutputFrame::stdout("12345")]);
        let output = demux(input, 5, later()).await.unwrap();
        assert_eq!(output.stdout, b"12345");
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn test_caps_each_stream_independently() {
        let input = frames(vec![
            OutputFrame::stdout("abcdef"),
            OutputFrame::stderr("xy"),
            OutputFrame::stdout("ghij"),
        ]);
        let output = demux(input, 4, later()).await.unwrap();
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stderr, b"xy");
        assert!(output.truncated);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_kept_verbatim() {
        let input = frames(vec![OutputFrame::stdout(vec![b'o', b'k', 0xff])]);
        let output = demux(input, 64, later()).await.unwrap();
        assert_eq!(output.stdout, vec![b'o', b'k', 0xff]);
    }

    #[tokio::test]
    async fn test_cap_may_split_a_character() {
        let input = frames(vec![OutputFrame::stdout("ab\u{e9}")]);
        let output = demux(input, 3, later()).await.unwrap();
        assert!(output.truncated);
        assert_eq!(output.stdout, vec![b'a', b'b', 0xc3]);
    }

    #[tokio::test]
    async fn test_stream_error_fails_capture() {
        let input = stream::iter(vec![
            Ok(OutputFrame::stdout("partial")),
            Err(Error::output_capture("log stream interrupted")),
        ])
        .boxed();
        let err = demux(input, 64, later()).await.unwrap_err();
        assert!(matches!(err, Error::OutputCaptureFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_partial_output() {
        let input = stream::iter(vec![Ok(OutputFrame::stdout("early"))])
            .chain(stream::pending())
            .boxed();
        let output = demux(input, 64, Instant::now() + Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(output.stdout, b"early");
        assert!(output.truncated);
    }

    #[tokio::test]
    async fn test_stops_reading_once_both_streams_are_full() {
        let input = stream::iter(vec![
            Ok(OutputFrame::stdout("aaaa")),
            Ok(OutputFrame::stderr("bbbb")),
        ])
        .chain(stream::pending())
        .boxed();
        let output = demux(input, 2, later()).await.unwrap();
        assert_eq!(output.stdout, b"aa");
        assert_eq!(output.stderr, b"bb");
        assert!(output.truncated);
    }
}
