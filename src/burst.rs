//! The prepared burst buffer: one frame, scaled and cut into device-sized blocks.
//!
//! Built once before the experiment and never touched again. The transmit
//! worker only ever sees it through an `Arc`, so sharing needs no locking.

use rand::Rng;
use tracing::{debug, info};

use crate::{
    complex::{db_to_linear, Sample},
    error::{Error, Result},
    frame::{make_header, make_payload, FrameBuilder},
};

/// Everything needed to prepare a burst
#[derive(Debug, Clone, Copy)]
pub struct BurstParams {
    /// Packet id written into the header
    pub pid: u16,
    /// Software gain [dB] applied to every sample
    pub gain_db: f32,
    /// Samples per block (the device's preferred transfer size)
    pub block_size: usize,
    /// Logical transmit channels each block is sent on
    pub channels: usize,
}

#[derive(Debug, Clone)]
pub struct BurstBuffer {
    blocks: Vec<Vec<Sample>>,
    channels: usize,
}

impl BurstBuffer {
    /// Build one frame, scale it by the linear gain and partition it into blocks.
    /// The last block is shorter when the frame isn't a multiple of the block size.
    pub fn prepare<F, R>(builder: &mut F, rng: &mut R, params: &BurstParams) -> Result<Self>
    where
        F: FrameBuilder + ?Sized,
        R: Rng + ?Sized,
    {
        if params.block_size == 0 {
            return Err(Error::InvalidConfig("block size must be non-zero".to_owned()));
        }
        if params.channels == 0 {
            return Err(Error::InvalidConfig(
                "at least one transmit channel is required".to_owned(),
            ));
        }
        let header = make_header(params.pid, rng);
        let payload = make_payload(rng);
        let frame = builder.build(&header, &payload)?;
        if frame.is_empty() {
            return Err(Error::FrameBuild("frame builder produced no samples".to_owned()));
        }
        if frame.len() != builder.frame_len() {
            return Err(Error::FrameBuild(format!(
                "frame builder produced {} samples, expected {}",
                frame.len(),
                builder.frame_len()
            )));
        }
        let g = db_to_linear(params.gain_db);
        let blocks: Vec<Vec<Sample>> = frame
            .chunks(params.block_size)
            .map(|chunk| chunk.iter().map(|s| *s * g).collect())
            .collect();
        debug!(?header, "frame header");
        info!(
            frame_len = frame.len(),
            blocks = blocks.len(),
            block_size = params.block_size,
            gain = g,
            "Prepared burst buffer"
        );
        Ok(Self {
            blocks,
            channels: params.channels,
        })
    }

    pub fn blocks(&self) -> &[Vec<Sample>] {
        &self.blocks
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Total samples in one repetition (per channel)
    pub fn len(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Per-block channel views: every channel points at the same block
    pub fn channel_views(&self) -> Vec<Vec<&[Sample]>> {
        self.blocks
            .iter()
            .map(|b| vec![b.as_slice(); self.channels])
            .collect()
    }
}
