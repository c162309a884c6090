//! This module contains all the capture logic

// The capture loop does one thing, as fast as possible: pull bytes off the
// device, count the samples, and append the raw bytes to the sink. Trigger
// decisions happen on the count after every read.

use std::io::{self, Read, Write};

use crate::error::Result;

/// Every 4 bytes off the capture device encode one complex sample
pub const BYTES_PER_SAMPLE: usize = 4;

pub struct CaptureReader<R, W> {
    device: R,
    sink: W,
    buf: Vec<u8>,
    sample_count: u64,
}

impl<R: Read, W: Write> CaptureReader<R, W> {
    pub fn new(device: R, sink: W, samples_per_read: usize) -> Self {
        Self {
            device,
            sink,
            buf: vec![0u8; samples_per_read * BYTES_PER_SAMPLE],
            sample_count: 0,
        }
    }

    /// Running number of samples read since start
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Read once, advance the sample count by what was actually read and
    /// persist those bytes. Short and empty reads are fine. Returns bytes read.
    pub fn step(&mut self) -> Result<usize> {
        let n = match self.device.read(&mut self.buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
            Err(e) => return Err(e.into()),
        };
        // A trailing partial sample is persisted but not counted
        self.sample_count += (n / BYTES_PER_SAMPLE) as u64;
        self.sink.write_all(&self.buf[..n])?;
        Ok(n)
    }

    /// Flush the sink and hand back the device and sink
    pub fn finish(mut self) -> Result<(R, W)> {
        self.sink.flush()?;
        Ok((self.device, self.sink))
    }
}
