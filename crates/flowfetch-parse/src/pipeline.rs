use std::collections::VecDeque;

use crate::error::Result;
use crate::parser::{FrameParser, Framing};
use crate::ring::{DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY};
use crate::split::{FrameSplitter, OverflowPolicy, SplitMode, SplitterConfig};

/// Buffer limits shared by the splitter stage
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub initial_capacity: usize,
    pub max_frame_len: usize,
    pub overflow: OverflowPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            max_frame_len: DEFAULT_MAX_CAPACITY,
            overflow: OverflowPolicy::Error,
        }
    }
}

/// Push-based composition of a [`FrameSplitter`] and a [`FrameParser`]
///
/// Chunks go in through [`push`](Self::push), items come out in the caller's
/// queue in input order. Once the parser signals termination or
/// [`finish`](Self::finish) has run, further input is ignored.
pub struct FramePipeline<P: FrameParser> {
    splitter: Option<FrameSplitter>,
    parser: P,
    done: bool,
}

impl<P: FrameParser> FramePipeline<P> {
    pub fn new(parser: P, config: &PipelineConfig) -> Self {
        let mode = match parser.framing() {
            Framing::Lines => Some(SplitMode::Lines),
            Framing::Blocks => Some(SplitMode::Blocks),
            Framing::Raw => None,
        };
        let splitter = mode.map(|mode| {
            FrameSplitter::new(SplitterConfig {
                mode,
                initial_capacity: config.initial_capacity,
                max_frame_len: config.max_frame_len,
                overflow: config.overflow,
            })
        });

        Self {
            splitter,
            parser,
            done: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8], out: &mut VecDeque<P::Item>) -> Result<()> {
        if self.done {
            return Ok(());
        }

        let parser = &mut self.parser;
        let flow = match &mut self.splitter {
            Some(splitter) => splitter.feed(chunk, |frame| parser.parse_frame(frame, out))?,
            None => parser.parse_frame(chunk, out)?,
        };

        if flow.is_break() {
            tracing::debug!("parser signalled end of stream");
            self.done = true;
        }
        Ok(())
    }

    /// Flush buffered input at end of stream
    pub fn finish(&mut self, out: &mut VecDeque<P::Item>) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;

        let parser = &mut self.parser;
        if let Some(splitter) = &mut self.splitter {
            if splitter
                .finish(|frame| parser.parse_frame(frame, out))?
                .is_break()
            {
                return Ok(());
            }
        }
        parser.finish(out)?;
        Ok(())
    }

    /// True once no further items will be produced
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }
}

/// Run a parser over a complete in-memory body
pub fn parse_all<P: FrameParser>(parser: P, input: &[u8]) -> Result<Vec<P::Item>> {
    let mut pipeline = FramePipeline::new(parser, &PipelineConfig::default());
    let mut out = VecDeque::new();
    pipeline.push(input, &mut out)?;
    pipeline.finish(&mut out)?;
    Ok(out.into())
}
