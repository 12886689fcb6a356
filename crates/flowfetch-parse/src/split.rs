use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, Result};
use crate::ring::{RingBuffer, DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY};

/// Boundary the splitter cuts frames at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitMode {
    /// One frame per `\n` or `\r\n` terminated line; empty lines are frames too
    #[default]
    Lines,
    /// One frame per blank-line separated block (an SSE message)
    ///
    /// Under [`OverflowPolicy::Skip`] an oversized block is dropped up to the
    /// next blank line.
    Blocks,
}

/// What to do with a frame longer than the configured maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Fail the stream with [`ParseError::BufferOverflow`]
    #[default]
    Error,
    /// Drop the oversized frame and resume after the next delimiter
    Skip,
}

#[derive(Debug, Clone)]
pub struct SplitterConfig {
    pub mode: SplitMode,
    pub initial_capacity: usize,
    pub max_frame_len: usize,
    pub overflow: OverflowPolicy,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            mode: SplitMode::Lines,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            max_frame_len: DEFAULT_MAX_CAPACITY,
            overflow: OverflowPolicy::Error,
        }
    }
}

/// Splits pushed byte chunks into delimiter-bounded frames
///
/// Bytes are staged in a [`RingBuffer`] and frames are handed to the sink as
/// borrowed views, so a frame is never decoded or copied unless it straddles
/// the ring's wraparound point. Delimiters split across chunks are handled by
/// remembering how far the previous push already searched.
pub struct FrameSplitter {
    buffer: RingBuffer,
    mode: SplitMode,
    max_frame_len: usize,
    overflow: OverflowPolicy,
    /// Logical offset up to which the buffer has been searched for `\n`
    scan_from: usize,
    /// Start of the current line inside a pending block
    line_start: usize,
    /// Dropping an oversized frame until its delimiter shows up
    discarding: bool,
    /// While discarding a block: nothing but `\r` seen since the last `\n`
    discard_line_blank: bool,
    emitted: u64,
    dropped: u64,
}

impl FrameSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        let max_frame_len = config.max_frame_len.max(1);
        // Room for the frame plus a `\r\n` delimiter.
        let max_capacity = max_frame_len.saturating_add(2);

        Self {
            buffer: RingBuffer::with_capacity(config.initial_capacity, max_capacity),
            mode: config.mode,
            max_frame_len,
            overflow: config.overflow,
            scan_from: 0,
            line_start: 0,
            discarding: false,
            discard_line_blank: false,
            emitted: 0,
            dropped: 0,
        }
    }

    pub fn lines() -> Self {
        Self::new(SplitterConfig::default())
    }

    pub fn blocks() -> Self {
        Self::new(SplitterConfig {
            mode: SplitMode::Blocks,
            ..Default::default()
        })
    }

    pub fn mode(&self) -> SplitMode {
        self.mode
    }

    /// Frames handed to the sink so far
    pub fn frames_emitted(&self) -> u64 {
        self.emitted
    }

    /// Oversized frames dropped under [`OverflowPolicy::Skip`]
    pub fn frames_dropped(&self) -> u64 {
        self.dropped
    }

    /// Bytes buffered but not yet part of a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Push a chunk, handing every complete frame to `sink` in input order
    ///
    /// Stops early, leaving the rest of the chunk unprocessed, as soon as the
    /// sink returns [`ControlFlow::Break`].
    pub fn feed<F>(&mut self, chunk: &[u8], mut sink: F) -> Result<ControlFlow<()>>
    where
        F: FnMut(&[u8]) -> Result<ControlFlow<()>>,
    {
        let mut rest = chunk;

        while !rest.is_empty() {
            if self.discarding {
                match self.resync_point(rest) {
                    Some(pos) => {
                        rest = &rest[pos + 1..];
                        self.discarding = false;
                        tracing::debug!("resynced after oversized frame");
                    }
                    None => return Ok(ControlFlow::Continue(())),
                }
                continue;
            }

            let room = self.buffer.max_capacity() - self.buffer.len();
            let take = rest.len().min(room);
            self.buffer.write(&rest[..take])?;
            rest = &rest[take..];

            if self.drain(&mut sink)?.is_break() {
                return Ok(ControlFlow::Break(()));
            }

            // Whatever is left has no delimiter yet.
            let pending = self.buffer.len();
            if pending > self.max_frame_len + 1 {
                self.overflow_pending(pending)?;
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    /// Emit the undelimited tail left at end of stream, if any
    pub fn finish<F>(&mut self, mut sink: F) -> Result<ControlFlow<()>>
    where
        F: FnMut(&[u8]) -> Result<ControlFlow<()>>,
    {
        if self.discarding {
            self.discarding = false;
            self.reset();
            return Ok(ControlFlow::Continue(()));
        }

        let mut end = self.buffer.len();
        match self.mode {
            SplitMode::Lines => {
                if end > 0 && self.buffer.peek_byte(end - 1) == Some(b'\r') {
                    end -= 1;
                }
            }
            SplitMode::Blocks => {
                while end > 0 && matches!(self.buffer.peek_byte(end - 1), Some(b'\n' | b'\r')) {
                    end -= 1;
                }
            }
        }

        let flow = if self.buffer.is_empty() || (self.mode == SplitMode::Blocks && end == 0) {
            ControlFlow::Continue(())
        } else {
            self.emit(end, &mut sink)?
        };
        self.reset();

        Ok(flow)
    }

    /// Index of the `\n` that ends the frame being discarded, if it is in `data`
    ///
    /// Lines end at the next `\n`; blocks end at the next blank line, which
    /// may be split across chunks.
    fn resync_point(&mut self, data: &[u8]) -> Option<usize> {
        match self.mode {
            SplitMode::Lines => memchr::memchr(b'\n', data),
            SplitMode::Blocks => {
                for (i, &byte) in data.iter().enumerate() {
                    match byte {
                        b'\n' if self.discard_line_blank => return Some(i),
                        b'\n' => self.discard_line_blank = true,
                        b'\r' => {}
                        _ => self.discard_line_blank = false,
                    }
                }
                None
            }
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.scan_from = 0;
        self.line_start = 0;
    }

    fn drain<F>(&mut self, sink: &mut F) -> Result<ControlFlow<()>>
    where
        F: FnMut(&[u8]) -> Result<ControlFlow<()>>,
    {
        match self.mode {
            SplitMode::Lines => self.drain_lines(sink),
            SplitMode::Blocks => self.drain_blocks(sink),
        }
    }

    fn drain_lines<F>(&mut self, sink: &mut F) -> Result<ControlFlow<()>>
    where
        F: FnMut(&[u8]) -> Result<ControlFlow<()>>,
    {
        while let Some(newline) = self.buffer.find_byte(self.scan_from, b'\n') {
            let mut end = newline;
            if end > 0 && self.buffer.peek_byte(end - 1) == Some(b'\r') {
                end -= 1;
            }

            let flow = self.emit(end, sink)?;
            self.buffer.consume(newline + 1);
            self.scan_from = 0;

            if flow.is_break() {
                return Ok(flow);
            }
        }

        self.scan_from = self.buffer.len();
        Ok(ControlFlow::Continue(()))
    }

    fn drain_blocks<F>(&mut self, sink: &mut F) -> Result<ControlFlow<()>>
    where
        F: FnMut(&[u8]) -> Result<ControlFlow<()>>,
    {
        while let Some(newline) = self.buffer.find_byte(self.scan_from, b'\n') {
            self.scan_from = newline + 1;

            let blank = newline == self.line_start
                || (newline == self.line_start + 1
                    && self.buffer.peek_byte(self.line_start) == Some(b'\r'));
            if !blank {
                self.line_start = newline + 1;
                continue;
            }

            // The block ends before the terminator of its last line.
            let mut end = self.line_start;
            if end > 0 && self.buffer.peek_byte(end - 1) == Some(b'\n') {
                end -= 1;
            }
            if end > 0 && self.buffer.peek_byte(end - 1) == Some(b'\r') {
                end -= 1;
            }

            let flow = if end > 0 {
                self.emit(end, sink)?
            } else {
                ControlFlow::Continue(())
            };
            self.buffer.consume(newline + 1);
            self.scan_from = 0;
            self.line_start = 0;

            if flow.is_break() {
                return Ok(flow);
            }
        }

        self.scan_from = self.buffer.len();
        Ok(ControlFlow::Continue(()))
    }

    /// Hand the first `len` buffered bytes to the sink, enforcing the frame limit
    fn emit<F>(&mut self, len: usize, sink: &mut F) -> Result<ControlFlow<()>>
    where
        F: FnMut(&[u8]) -> Result<ControlFlow<()>>,
    {
        if len > self.max_frame_len {
            let err = ParseError::BufferOverflow {
                len,
                max: self.max_frame_len,
            };
            return match self.overflow {
                OverflowPolicy::Error => Err(err),
                OverflowPolicy::Skip => {
                    self.dropped += 1;
                    tracing::warn!(len, max = self.max_frame_len, "dropping oversized frame");
                    Ok(ControlFlow::Continue(()))
                }
            };
        }

        match self.buffer.view(0, len) {
            Some(frame) => {
                self.emitted += 1;
                sink(&frame)
            }
            None => Ok(ControlFlow::Continue(())),
        }
    }

    /// Deal with a partial frame that already outgrew the limit
    fn overflow_pending(&mut self, pending: usize) -> Result<()> {
        match self.overflow {
            OverflowPolicy::Error => Err(ParseError::BufferOverflow {
                len: pending,
                max: self.max_frame_len,
            }),
            OverflowPolicy::Skip => {
                self.dropped += 1;
                tracing::warn!(
                    pending,
                    max = self.max_frame_len,
                    "frame exceeds buffer limit, skipping to next delimiter"
                );
                self.discard_line_blank = self.buffer.peek_byte(pending - 1) == Some(b'\n');
                self.reset();
                self.discarding = true;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for FrameSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSplitter")
            .field("mode", &self.mode)
            .field("max_frame_len", &self.max_frame_len)
            .field("overflow", &self.overflow)
            .field("buffered", &self.buffer.len())
            .field("discarding", &self.discarding)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(splitter: &mut FrameSplitter, chunks: &[&[u8]]) -> Vec<String> {
        let mut frames = Vec::new();
        for chunk in chunks {
            splitter
                .feed(chunk, |frame| {
                    frames.push(String::from_utf8_lossy(frame).into_owned());
                    Ok(ControlFlow::Continue(()))
                })
                .unwrap();
        }
        splitter
            .finish(|frame| {
                frames.push(String::from_utf8_lossy(frame).into_owned());
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
        frames
    }

    #[test]
    fn test_lines_keep_empty_frames() {
        let mut splitter = FrameSplitter::lines();
        let frames = collect(&mut splitter, &[b"a\n\nb\r\n\r\nc"]);
        assert_eq!(frames, vec!["a", "", "b", "", "c"]);
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut splitter = FrameSplitter::lines();
        let frames = collect(&mut splitter, &[b"data: 1\r", b"\ndata: 2\r\n"]);
        assert_eq!(frames, vec!["data: 1", "data: 2"]);
    }

    #[test]
    fn test_chunking_does_not_change_frames() {
        let input: &[u8] = b"event: a\ndata: {\"x\":1}\n\n: ping\r\ndata: tail";

        let mut whole = FrameSplitter::lines();
        let expected = collect(&mut whole, &[input]);

        for size in 1..input.len() {
            let chunks: Vec<&[u8]> = input.chunks(size).collect();
            let mut splitter = FrameSplitter::new(SplitterConfig {
                initial_capacity: 4,
                ..Default::default()
            });
            assert_eq!(collect(&mut splitter, &chunks), expected, "chunk size {size}");
        }
    }

    #[test]
    fn test_blocks_mode() {
        let mut splitter = FrameSplitter::blocks();
        let frames = collect(
            &mut splitter,
            &[b"\n\nevent: a\ndata: 1\n", b"\ndata: 2\r\n\r\n\r\ndata: 3\n"],
        );
        assert_eq!(frames, vec!["event: a\ndata: 1", "data: 2", "data: 3"]);
    }

    #[test]
    fn test_sink_break_stops_processing() {
        let mut splitter = FrameSplitter::lines();
        let mut seen = Vec::new();
        let flow = splitter
            .feed(b"one\ntwo\nthree\n", |frame| {
                seen.push(frame.to_vec());
                Ok(if frame == b"two" {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                })
            })
            .unwrap();
        assert!(flow.is_break());
        assert_eq!(seen, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn test_oversized_line_errors() {
        let mut splitter = FrameSplitter::new(SplitterConfig {
            max_frame_len: 8,
            ..Default::default()
        });
        let err = splitter
            .feed(b"this line is far too long\nok\n", |_| Ok(ControlFlow::Continue(())))
            .unwrap_err();
        assert!(err.is_overflow());
    }

    #[test]
    fn test_oversized_block_skipped_to_blank_line() {
        let input: &[u8] = b"data: aaaa\ndata: bbbb\ndata: c\n\ndata: ok\n\n";
        for size in 1..=input.len() {
            let chunks: Vec<&[u8]> = input.chunks(size).collect();
            let mut splitter = FrameSplitter::new(SplitterConfig {
                mode: SplitMode::Blocks,
                max_frame_len: 8,
                initial_capacity: 4,
                overflow: OverflowPolicy::Skip,
            });
            assert_eq!(collect(&mut splitter, &chunks), vec!["data: ok"], "chunk size {size}");
            assert_eq!(splitter.frames_dropped(), 1);
            assert_eq!(splitter.frames_emitted(), 1);
        }
    }

    #[test]
    fn test_oversized_block_resync_on_crlf_blank_line() {
        let mut splitter = FrameSplitter::new(SplitterConfig {
            mode: SplitMode::Blocks,
            max_frame_len: 8,
            overflow: OverflowPolicy::Skip,
            ..Default::default()
        });
        let frames = collect(
            &mut splitter,
            &[b"data: 0123456789\r\n", b"data: x\r", b"\n\r", b"\ndata: ok\r\n\r\n"],
        );
        assert_eq!(frames, vec!["data: ok"]);
    }

    #[test]
    fn test_oversized_line_skipped_and_resynced() {
        let mut splitter = FrameSplitter::new(SplitterConfig {
            max_frame_len: 8,
            initial_capacity: 4,
            overflow: OverflowPolicy::Skip,
            ..Default::default()
        });
        let frames = collect(
            &mut splitter,
            &[b"this line", b" is far too long", b" to keep\nok\n", b"0123456789\nfine\n"],
        );
        assert_eq!(frames, vec!["ok", "fine"]);
        assert_eq!(splitter.frames_dropped(), 2);
        assert_eq!(splitter.frames_emitted(), 2);
    }
}
