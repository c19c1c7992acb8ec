//! Hypothetical reference decoder buffer model (H.264 Annex C).
//!
//! The simulator tracks the coded picture buffer (CPB) fill level while
//! access units arrive at the signalled bit rate and are removed at their
//! removal times. The result is a list of [`HrdEntry`] segments plus the
//! conformance problems found on the way.

use std::collections::VecDeque;
use std::fmt;

use crate::av::{HrdEntry, HrdEntryKind};

/// Timing of one access unit, taken from the active SPS and the buffering
/// period and picture timing SEIs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HrdAuTiming {
    /// `num_units_in_tick / time_scale` in seconds
    pub clock_tick: f64,
    /// Bits per second
    pub bit_rate: u64,
    /// Bits
    pub cpb_size: u64,
    pub cbr: bool,
    pub low_delay: bool,
    /// In units of a 90 kHz clock
    pub initial_cpb_removal_delay: u32,
    pub initial_cpb_removal_delay_offset: u32,
    /// In clock ticks
    pub cpb_removal_delay: u32,
    pub first_in_buffering_period: bool,
}

/// One access unit handed to the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HrdAuInput {
    pub bits: u64,
    pub poc: i64,
    pub timing: HrdAuTiming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Initial removal delay violates C.3 item 1
    InitialDelay,
    Overflow,
    Underflow,
    /// A pending picture was removed later than its removal time
    LateRemoval,
    /// Removal times of pending pictures are not increasing
    RemovalOrder,
    /// Zero bit rate or clock tick
    InvalidTiming,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WarningKind::InitialDelay => "initial delay",
            WarningKind::Overflow => "overflow",
            WarningKind::Underflow => "underflow",
            WarningKind::LateRemoval => "late removal",
            WarningKind::RemovalOrder => "removal order",
            WarningKind::InvalidTiming => "invalid timing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConformanceWarning {
    pub au: u64,
    pub poc: i64,
    pub kind: WarningKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
struct PendingRemoval {
    t_r: f64,
    bits: u64,
    poc: i64,
}

/// CPB simulation state for one stream.
#[derive(Debug, Default)]
pub struct HrdSimulator {
    level: i64,
    cpb_size: u64,
    au_counter: u64,
    t_af_prev: f64,
    t_r_nominal_first: f64,
    pending: VecDeque<PendingRemoval>,
    entries: Vec<HrdEntry>,
    warnings: Vec<ConformanceWarning>,
}

impl HrdSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current fill level in bits
    pub fn level(&self) -> u64 {
        self.level.max(0) as u64
    }

    pub fn entries(&self) -> &[HrdEntry] {
        &self.entries
    }

    pub fn warnings(&self) -> &[ConformanceWarning] {
        &self.warnings
    }

    pub fn au_count(&self) -> u64 {
        self.au_counter
    }

    pub fn into_parts(self) -> (Vec<HrdEntry>, Vec<ConformanceWarning>) {
        (self.entries, self.warnings)
    }

    fn warn(&mut self, poc: i64, kind: WarningKind, message: String) {
        log::warn!("HRD AU {} POC {} {}: {}", self.au_counter, poc, kind, message);
        self.warnings.push(ConformanceWarning {
            au: self.au_counter,
            poc,
            kind,
            message,
        });
    }

    /// Feeds the next access unit in decoding order.
    pub fn add_au(&mut self, input: &HrdAuInput) {
        let timing = &input.timing;
        let poc = input.poc;
        if timing.bit_rate == 0 || timing.clock_tick <= 0.0 {
            self.warn(
                poc,
                WarningKind::InvalidTiming,
                format!(
                    "bit rate {} clock tick {}",
                    timing.bit_rate, timing.clock_tick
                ),
            );
            return;
        }
        self.cpb_size = timing.cpb_size;
        let bit_rate = timing.bit_rate as f64;
        let t_c = timing.clock_tick;
        let first_in_period = timing.first_in_buffering_period;
        let init_delay = timing.initial_cpb_removal_delay as f64;

        // C.1.2 nominal removal time
        let t_r_nominal = if self.au_counter == 0 {
            init_delay / 90000.0
        } else {
            self.t_r_nominal_first + t_c * timing.cpb_removal_delay as f64
        };
        if first_in_period {
            self.t_r_nominal_first = t_r_nominal;
        }

        // C.1.1 arrival times
        let t_ai = if self.au_counter == 0 {
            0.0
        } else if timing.cbr {
            self.t_af_prev
        } else {
            let delay = if first_in_period {
                init_delay
            } else {
                init_delay + timing.initial_cpb_removal_delay_offset as f64
            };
            self.t_af_prev.max(t_r_nominal - delay / 90000.0)
        };
        let t_af_full = t_ai + input.bits as f64 / bit_rate;

        let t_r = if timing.low_delay && t_r_nominal < t_af_full {
            t_r_nominal + t_c * ((t_af_full - t_r_nominal) / t_c).ceil()
        } else {
            t_r_nominal
        };

        // C.3 item 1
        if self.au_counter > 0 && first_in_period {
            let t_g_90 = (t_r_nominal - self.t_af_prev) * 90000.0;
            if !timing.cbr && init_delay > t_g_90.ceil() {
                self.warn(
                    poc,
                    WarningKind::InitialDelay,
                    format!(
                        "initial_cpb_removal_delay {} should be <= ceil(t_g_90) {}",
                        timing.initial_cpb_removal_delay,
                        t_g_90.ceil()
                    ),
                );
            }
            if timing.cbr && init_delay < t_g_90.floor() {
                self.warn(
                    poc,
                    WarningKind::InitialDelay,
                    format!(
                        "initial_cpb_removal_delay {} should be >= floor(t_g_90) {}",
                        timing.initial_cpb_removal_delay,
                        t_g_90.floor()
                    ),
                );
            }
        }

        // Between the previous final arrival and this initial arrival no bits
        // enter the buffer, but earlier pictures may leave it.
        if self.t_af_prev < t_ai {
            let mut last_time = self.t_af_prev;
            while let Some(front) = self.pending.front().copied() {
                if front.t_r > t_ai {
                    break;
                }
                self.pending.pop_front();
                self.add_constant_line(poc, last_time, front.t_r);
                self.remove_from_buffer(front, front.t_r);
                last_time = front.t_r;
            }
        }

        let relevant = self.pop_removals_in_interval(t_ai, t_af_full, poc);
        let underflow = t_r < t_af_full;
        let mut t_af = t_af_full;

        if relevant.is_empty() && !underflow {
            self.add_to_buffer(input.bits, poc, t_ai, t_af);
        } else {
            let mut t_sub = t_ai;
            let mut added = 0u64;
            let mut remainder = 0.0f64;
            for frame in relevant {
                let fractional = bit_rate * (frame.t_r - t_sub) + remainder;
                let add = fractional.floor().max(0.0);
                remainder = fractional - add;
                added += add as u64;
                self.add_to_buffer(add as u64, poc, t_sub, frame.t_r);
                self.remove_from_buffer(frame, frame.t_r);
                t_sub = frame.t_r;
            }
            if underflow {
                // Transmission of this AU stops once it is removed.
                let fractional = bit_rate * (t_r - t_sub) + remainder;
                self.add_to_buffer(fractional.floor().max(0.0) as u64, poc, t_sub, t_r);
                self.remove_from_buffer(
                    PendingRemoval {
                        t_r,
                        bits: input.bits,
                        poc,
                    },
                    t_r,
                );
                t_af = t_r;
            } else {
                self.add_to_buffer(input.bits.saturating_sub(added), poc, t_sub, t_af);
            }
        }

        if !underflow {
            self.pending.push_back(PendingRemoval {
                t_r,
                bits: input.bits,
                poc,
            });
        }

        // C.3 item 3
        if t_r_nominal < t_af_full && !timing.low_delay {
            self.warn(
                poc,
                WarningKind::Underflow,
                format!(
                    "nominal removal time {:.6} before final arrival {:.6}",
                    t_r_nominal, t_af_full
                ),
            );
        }

        self.t_af_prev = t_af;
        self.au_counter += 1;
    }

    /// Removes every pending picture after the last access unit.
    pub fn end_of_stream(&mut self) {
        let mut last_time = self.t_af_prev;
        while let Some(frame) = self.pending.pop_front() {
            self.add_constant_line(frame.poc, last_time, frame.t_r);
            self.remove_from_buffer(frame, frame.t_r);
            last_time = frame.t_r;
        }
    }

    fn pop_removals_in_interval(&mut self, from: f64, to: f64, poc: i64) -> Vec<PendingRemoval> {
        let mut relevant = Vec::new();
        let mut t_r_previous = 0.0;
        let mut kept = VecDeque::with_capacity(self.pending.len());
        while let Some(frame) = self.pending.pop_front() {
            if frame.t_r < from {
                self.warn(
                    poc,
                    WarningKind::LateRemoval,
                    format!(
                        "picture {} was not removed at {:.6}, dropping it",
                        frame.poc, frame.t_r
                    ),
                );
            } else if frame.t_r < t_r_previous {
                self.warn(
                    poc,
                    WarningKind::RemovalOrder,
                    format!(
                        "picture {} removal time {:.6} precedes {:.6}, dropping it",
                        frame.poc, frame.t_r, t_r_previous
                    ),
                );
            } else if frame.t_r < to {
                t_r_previous = frame.t_r;
                relevant.push(frame);
            } else {
                kept.push_back(frame);
                kept.extend(self.pending.drain(..));
            }
        }
        self.pending = kept;
        relevant
    }

    fn clamped(&self, level: i64) -> u64 {
        (level.max(0) as u64).min(self.cpb_size)
    }

    fn add_to_buffer(&mut self, bits: u64, poc: i64, t_begin: f64, t_end: f64) {
        let old = self.level;
        self.level += bits as i64;
        self.entries.push(HrdEntry {
            kind: HrdEntryKind::Adding,
            cpb_fullness_start: self.clamped(old),
            cpb_fullness_end: self.clamped(self.level),
            time_start: t_begin,
            time_end: t_end,
            poc,
        });
        if self.level > self.cpb_size as i64 {
            let excess = self.level - self.cpb_size as i64;
            self.warn(
                poc,
                WarningKind::Overflow,
                format!("time {:.6} buffer overflow by {} bits", t_end, excess),
            );
            self.level = self.cpb_size as i64;
        }
    }

    fn remove_from_buffer(&mut self, frame: PendingRemoval, removal_time: f64) {
        let old = self.level;
        self.level -= frame.bits as i64;
        self.entries.push(HrdEntry {
            kind: HrdEntryKind::Removal,
            cpb_fullness_start: self.clamped(old),
            cpb_fullness_end: self.clamped(self.level),
            time_start: removal_time,
            time_end: removal_time,
            poc: frame.poc,
        });
        if self.level < 0 {
            let missing = -self.level;
            self.warn(
                frame.poc,
                WarningKind::Underflow,
                format!(
                    "time {:.6} buffer underflow by {} bits",
                    removal_time, missing
                ),
            );
            self.level = 0;
        }
    }

    fn add_constant_line(&mut self, poc: i64, t_begin: f64, t_end: f64) {
        let level = self.clamped(self.level);
        self.entries.push(HrdEntry {
            kind: HrdEntryKind::Adding,
            cpb_fullness_start: level,
            cpb_fullness_end: level,
            time_start: t_begin,
            time_end: t_end,
            poc,
        });
    }
}
