//! Deterministic pseudo-random channel emulator applied to every inbound
//! segment at the server (§4.6). Seeded explicitly so a run can be replayed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::segment::HEADER_LEN;

/// Sampled outcome for one inbound segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Proceed normally.
    None,
    /// Drop silently; no state change, no reply.
    LostIn,
    /// Run the FSM normally but suppress the reply.
    LostOut,
    /// Pretend the inbound checksum is wrong; drop silently.
    SumIn,
    /// Run the FSM; corrupt 5 random byte positions of the reply header
    /// before sending it.
    SumOut,
}

pub struct FaultInjector {
    rng: StdRng,
    disabled: bool,
}

impl FaultInjector {
    pub fn new(seed: u64) -> FaultInjector {
        FaultInjector {
            rng: StdRng::seed_from_u64(seed),
            disabled: false,
        }
    }

    /// Forces every draw to `Outcome::None`, for tests that need a clean
    /// channel to exercise the protocol FSM without racing the injector.
    #[cfg(test)]
    pub(crate) fn disable_faults(&mut self) {
        self.disabled = true;
    }

    /// Draws a fault outcome for one inbound segment, per the distribution
    /// in §4.6: NONE 70%, LOST_IN 10%, LOST_OUT 5%, SUM_IN 5%, SUM_OUT 10%.
    pub fn sample(&mut self) -> Outcome {
        if self.disabled {
            return Outcome::None;
        }
        match self.rng.gen_range(0..100) {
            0..=69 => Outcome::None,
            70..=79 => Outcome::LostIn,
            80..=84 => Outcome::LostOut,
            85..=89 => Outcome::SumIn,
            _ => Outcome::SumOut,
        }
    }

    /// Draws a fresh advertised window uniformly from `[1, mss]` (§4.5).
    pub fn choose_window(&mut self, mss: u16) -> u16 {
        self.rng.gen_range(1..=mss)
    }

    /// Corrupts 5 random byte positions within the reply header by
    /// overwriting each with a random byte (SUM_OUT, §4.6). `buf` must hold
    /// at least a full header; bytes beyond the header length are untouched.
    pub fn corrupt_header(&mut self, buf: &mut [u8]) {
        let header_len = HEADER_LEN.min(buf.len());
        let header = &mut buf[..header_len];
        for _ in 0..5 {
            if header.is_empty() {
                break;
            }
            let idx = self.rng.gen_range(0..header.len());
            header[idx] = self.rng.gen();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_matches_spec_under_fixed_seed() {
        let mut injector = FaultInjector::new(42);
        let mut counts = [0u32; 5];
        const N: u32 = 100_000;

        for _ in 0..N {
            match injector.sample() {
                Outcome::None => counts[0] += 1,
                Outcome::LostIn => counts[1] += 1,
                Outcome::LostOut => counts[2] += 1,
                Outcome::SumIn => counts[3] += 1,
                Outcome::SumOut => counts[4] += 1,
            }
        }

        let expect = [70.0, 10.0, 5.0, 5.0, 10.0];
        for (count, pct) in counts.iter().zip(expect) {
            let observed_pct = *count as f64 / N as f64 * 100.0;
            assert!(
                (observed_pct - pct).abs() < 1.0,
                "observed {observed_pct} expected ~{pct}"
            );
        }
    }

    #[test]
    fn same_seed_replays_identically() {
        let mut a = FaultInjector::new(7);
        let mut b = FaultInjector::new(7);

        let seq_a: Vec<_> = (0..50).map(|_| a.sample()).collect();
        let seq_b: Vec<_> = (0..50).map(|_| b.sample()).collect();

        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn window_stays_in_range() {
        let mut injector = FaultInjector::new(1);
        for _ in 0..1000 {
            let w = injector.choose_window(255);
            assert!(w >= 1 && w <= 255);
        }
    }
}
