//! Physical-layer frame construction.
//!
//! The harness only needs "one fixed-length frame from an 8 byte header and a
//! 64 byte payload". Anything that can do that implements [`FrameBuilder`];
//! [`Frame64`] is the built-in generator used by the binary.

use rand::Rng;

use crate::{
    complex::Sample,
    error::{Error, Result},
};

pub const HEADER_LEN: usize = 8;
pub const PAYLOAD_LEN: usize = 64;

pub type Header = [u8; HEADER_LEN];
pub type Payload = [u8; PAYLOAD_LEN];

pub trait FrameBuilder {
    /// Number of samples every call to `build` produces
    fn frame_len(&self) -> usize;

    fn build(&mut self, header: &Header, payload: &Payload) -> Result<Vec<Sample>>;
}

/// Header with the packet id in the first two bytes (big endian) and random filler
pub fn make_header<R: Rng + ?Sized>(pid: u16, rng: &mut R) -> Header {
    let mut header = [0u8; HEADER_LEN];
    header[..2].copy_from_slice(&pid.to_be_bytes());
    rng.fill(&mut header[2..]);
    header
}

pub fn make_payload<R: Rng + ?Sized>(rng: &mut R) -> Payload {
    let mut payload = [0u8; PAYLOAD_LEN];
    rng.fill(&mut payload[..]);
    payload
}

// Frame layout, in symbols: guard | preamble | header + payload | guard
const GUARD_SYMBOLS: usize = 4;
const PREAMBLE_SYMBOLS: usize = 63;
// QPSK, two bits per symbol
const DATA_SYMBOLS: usize = (HEADER_LEN + PAYLOAD_LEN) * 8 / 2;
const SAMPLES_PER_SYMBOL: usize = 2;

/// Samples in one [`Frame64`] frame
pub const FRAME64_LEN: usize =
    (2 * GUARD_SYMBOLS + PREAMBLE_SYMBOLS + DATA_SYMBOLS) * SAMPLES_PER_SYMBOL;

/// Fixed-length frame generator: BPSK m-sequence preamble followed by the
/// QPSK mapped header and payload, rectangular pulses, zero guards.
#[derive(Debug, Default, Clone)]
pub struct Frame64;

impl Frame64 {
    pub fn new() -> Self {
        Self
    }
}

/// Maximal length sequence from x^6 + x^5 + 1
fn msequence() -> impl Iterator<Item = bool> {
    let mut state = 0b00_0001u8;
    (0..PREAMBLE_SYMBOLS).map(move |_| {
        let out = state & 1 == 1;
        let fb = ((state >> 5) ^ (state >> 4)) & 1;
        state = ((state << 1) | fb) & 0x3f;
        out
    })
}

fn qpsk(bits: u8) -> Sample {
    let a = std::f32::consts::FRAC_1_SQRT_2;
    let re = if bits & 0b10 == 0 { a } else { -a };
    let im = if bits & 0b01 == 0 { a } else { -a };
    Sample::new(re, im)
}

impl FrameBuilder for Frame64 {
    fn frame_len(&self) -> usize {
        FRAME64_LEN
    }

    fn build(&mut self, header: &Header, payload: &Payload) -> Result<Vec<Sample>> {
        let mut symbols = Vec::with_capacity(FRAME64_LEN / SAMPLES_PER_SYMBOL);
        symbols.extend(std::iter::repeat(Sample::default()).take(GUARD_SYMBOLS));
        symbols.extend(msequence().map(|b| Sample::new(if b { 1.0 } else { -1.0 }, 0.0)));
        for byte in header.iter().chain(payload.iter()) {
            // MSB first
            for shift in [6u8, 4, 2, 0] {
                symbols.push(qpsk((byte >> shift) & 0b11));
            }
        }
        symbols.extend(std::iter::repeat(Sample::default()).take(GUARD_SYMBOLS));

        let frame: Vec<Sample> = symbols
            .into_iter()
            .flat_map(|s| std::iter::repeat(s).take(SAMPLES_PER_SYMBOL))
            .collect();
        if frame.len() != FRAME64_LEN {
            return Err(Error::FrameBuild(format!(
                "expected {} samples, generated {}",
                FRAME64_LEN,
                frame.len()
            )));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_header_layout() {
        let mut rng = StdRng::seed_from_u64(7);
        let header = make_header(0x1234, &mut rng);
        assert_eq!(header[0], 0x12);
        assert_eq!(header[1], 0x34);
        // Same seed, same filler
        let again = make_header(0x1234, &mut StdRng::seed_from_u64(7));
        assert_eq!(header, again);
    }

    #[test]
    fn test_msequence_balance() {
        // An m-sequence of period 63 has 32 ones and 31 zeros
        let ones = msequence().filter(|&b| b).count();
        assert_eq!(ones, 32);
    }

    #[test]
    fn test_frame_length() {
        let mut rng = StdRng::seed_from_u64(1);
        let header = make_header(0, &mut rng);
        let payload = make_payload(&mut rng);
        let mut fg = Frame64::new();
        let frame = fg.build(&header, &payload).unwrap();
        assert_eq!(frame.len(), fg.frame_len());
        assert_eq!(frame[0], Sample::default());
        assert_eq!(*frame.last().unwrap(), Sample::default());
    }

    #[test]
    fn test_qpsk_mapping() {
        let header = [0u8; HEADER_LEN];
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[0] = 0b1100_0000;
        let frame = Frame64::new().build(&header, &payload).unwrap();
        let first_payload_symbol = GUARD_SYMBOLS + PREAMBLE_SYMBOLS + HEADER_LEN * 4;
        let s = frame[first_payload_symbol * SAMPLES_PER_SYMBOL];
        assert!(s.re < 0.0 && s.im < 0.0);
        let next = frame[(first_payload_symbol + 1) * SAMPLES_PER_SYMBOL];
        assert!(next.re > 0.0 && next.im > 0.0);
    }
}
