use bytes::Bytes;

use super::sps::{HrdParameters, Sps};
use crate::codec::ParameterSetRegistry;
use crate::error::{DemuxError, Result};
use crate::trace::TraceScope;
use crate::utils::BitReader;

pub const BUFFERING_PERIOD: u32 = 0;
pub const PIC_TIMING: u32 = 1;

/// One `sei_message()` with its payload bytes (emulation prevention removed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeiMessage {
    pub payload_type: u32,
    pub payload: Bytes,
}

impl SeiMessage {
    pub fn type_name(&self) -> &'static str {
        match self.payload_type {
            BUFFERING_PERIOD => "buffering_period",
            PIC_TIMING => "pic_timing",
            2 => "pan_scan_rect",
            3 => "filler_payload",
            4 => "user_data_registered_itu_t_t35",
            5 => "user_data_unregistered",
            6 => "recovery_point",
            _ => "sei_payload",
        }
    }
}

fn read_extended_value(rbsp: &[u8], pos: &mut usize) -> Result<u32> {
    let mut value = 0u32;
    loop {
        let byte = *rbsp.get(*pos).ok_or(DemuxError::OutOfData)?;
        *pos += 1;
        value += byte as u32;
        if byte != 0xFF {
            return Ok(value);
        }
    }
}

/// Splits an SEI RBSP into its messages.
///
/// Payload type and size use the 0xFF extension. Parsing stops at the
/// trailing bits byte `0x80`.
pub fn split_messages(rbsp: &[u8]) -> Result<Vec<SeiMessage>> {
    let mut messages = Vec::new();
    let mut pos = 0;
    while pos < rbsp.len() && rbsp[pos] != 0x80 {
        let payload_type = read_extended_value(rbsp, &mut pos)?;
        let payload_size = read_extended_value(rbsp, &mut pos)? as usize;
        let available = rbsp.len() - pos;
        if payload_size > available {
            return Err(DemuxError::TruncatedUnit {
                declared: payload_size as u64,
                available: available as u64,
            });
        }
        messages.push(SeiMessage {
            payload_type,
            payload: Bytes::copy_from_slice(&rbsp[pos..pos + payload_size]),
        });
        pos += payload_size;
    }
    Ok(messages)
}

/// Initial removal delay and offset of one schedule, in 90 kHz units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpbRemovalDelay {
    pub delay: u32,
    pub offset: u32,
}

/// Buffering period SEI (D.1.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferingPeriod {
    pub seq_parameter_set_id: u32,
    pub nal: Vec<CpbRemovalDelay>,
    pub vcl: Vec<CpbRemovalDelay>,
}

impl BufferingPeriod {
    pub fn parse(
        payload: &[u8],
        sps_set: &ParameterSetRegistry<Sps>,
        trace: &mut TraceScope<'_>,
    ) -> Result<Self> {
        let mut reader = BitReader::new(payload);
        let seq_parameter_set_id = trace.ue(&mut reader, "seq_parameter_set_id")?;
        let sps = sps_set.require(seq_parameter_set_id)?;

        let nal = read_delays(&mut reader, sps.nal_hrd(), trace)?;
        let vcl = read_delays(&mut reader, sps.vcl_hrd(), trace)?;

        Ok(Self {
            seq_parameter_set_id,
            nal,
            vcl,
        })
    }
}

fn read_delays(
    reader: &mut BitReader<'_>,
    hrd: Option<&HrdParameters>,
    trace: &mut TraceScope<'_>,
) -> Result<Vec<CpbRemovalDelay>> {
    let Some(hrd) = hrd else {
        return Ok(Vec::new());
    };
    let length = hrd.initial_cpb_removal_delay_length;
    let mut delays = Vec::with_capacity(hrd.schedules.len());
    for _ in &hrd.schedules {
        delays.push(CpbRemovalDelay {
            delay: trace.bits(reader, length, "initial_cpb_removal_delay")?,
            offset: trace.bits(reader, length, "initial_cpb_removal_delay_offset")?,
        });
    }
    Ok(delays)
}

/// `clock_timestamp` of a picture timing SEI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockTimestamp {
    pub ct_type: u8,
    pub counting_type: u8,
    pub discontinuity_flag: bool,
    pub n_frames: u8,
    pub seconds: Option<u8>,
    pub minutes: Option<u8>,
    pub hours: Option<u8>,
    pub time_offset: Option<u32>,
}

/// Picture timing SEI (D.1.3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PicTiming {
    pub cpb_removal_delay: Option<u32>,
    pub dpb_output_delay: Option<u32>,
    pub pic_struct: Option<u8>,
    pub clock_timestamps: Vec<ClockTimestamp>,
}

impl PicTiming {
    /// Parses the payload. The field lengths come from the SPS of the
    /// access unit the message belongs to.
    pub fn parse(payload: &[u8], sps: &Sps, trace: &mut TraceScope<'_>) -> Result<Self> {
        let mut reader = BitReader::new(payload);
        let mut timing = PicTiming::default();

        if let Some(hrd) = sps.any_hrd() {
            timing.cpb_removal_delay = Some(trace.bits(
                &mut reader,
                hrd.cpb_removal_delay_length,
                "cpb_removal_delay",
            )?);
            timing.dpb_output_delay = Some(trace.bits(
                &mut reader,
                hrd.dpb_output_delay_length,
                "dpb_output_delay",
            )?);
        }

        let pic_struct_present = sps
            .vui
            .as_ref()
            .map(|v| v.pic_struct_present_flag)
            .unwrap_or(false);
        if pic_struct_present {
            let pic_struct = trace.bits(&mut reader, 4, "pic_struct")? as u8;
            timing.pic_struct = Some(pic_struct);
            let num_clock_ts = match pic_struct {
                0..=2 => 1,
                3 | 4 | 7 => 2,
                5 | 6 | 8 => 3,
                other => {
                    return Err(DemuxError::InvalidData(format!("pic_struct {}", other)));
                }
            };
            let time_offset_length = sps.any_hrd().map(|h| h.time_offset_length).unwrap_or(24);
            for _ in 0..num_clock_ts {
                if !trace.flag(&mut reader, "clock_timestamp_flag")? {
                    continue;
                }
                timing.clock_timestamps.push(clock_timestamp(
                    &mut reader,
                    time_offset_length,
                    &mut trace.child("clock_timestamp"),
                )?);
            }
        }
        Ok(timing)
    }
}

fn clock_timestamp(
    reader: &mut BitReader<'_>,
    time_offset_length: u32,
    trace: &mut TraceScope<'_>,
) -> Result<ClockTimestamp> {
    let mut ts = ClockTimestamp {
        ct_type: trace.bits(reader, 2, "ct_type")? as u8,
        ..Default::default()
    };
    trace.flag(reader, "nuit_field_based_flag")?;
    ts.counting_type = trace.bits(reader, 5, "counting_type")? as u8;
    let full_timestamp_flag = trace.flag(reader, "full_timestamp_flag")?;
    ts.discontinuity_flag = trace.flag(reader, "discontinuity_flag")?;
    trace.flag(reader, "cnt_dropped_flag")?;
    ts.n_frames = trace.bits(reader, 8, "n_frames")? as u8;
    if full_timestamp_flag {
        ts.seconds = Some(trace.bits(reader, 6, "seconds_value")? as u8);
        ts.minutes = Some(trace.bits(reader, 6, "minutes_value")? as u8);
        ts.hours = Some(trace.bits(reader, 5, "hours_value")? as u8);
    } else if trace.flag(reader, "seconds_flag")? {
        ts.seconds = Some(trace.bits(reader, 6, "seconds_value")? as u8);
        if trace.flag(reader, "minutes_flag")? {
            ts.minutes = Some(trace.bits(reader, 6, "minutes_value")? as u8);
            if trace.flag(reader, "hours_flag")? {
                ts.hours = Some(trace.bits(reader, 5, "hours_value")? as u8);
            }
        }
    }
    if time_offset_length > 0 {
        ts.time_offset = Some(trace.bits(reader, time_offset_length, "time_offset")?);
    }
    Ok(ts)
}

/// A message whose parsing waits for a parameter set.
#[derive(Debug, Clone, PartialEq)]
pub enum Deferred<T> {
    Ready(T),
    /// Payload kept until the next slice names the active SPS
    Waiting(Bytes),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_messages() {
        let rbsp = [0x00, 0x02, 0xAA, 0xBB, 0xFF, 0x01, 0x01, 0xCC, 0x80];
        let messages = split_messages(&rbsp).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload_type, BUFFERING_PERIOD);
        assert_eq!(&messages[0].payload[..], &[0xAA, 0xBB]);
        assert_eq!(messages[1].payload_type, 256);
        assert_eq!(&messages[1].payload[..], &[0xCC]);
    }

    #[test]
    fn test_split_messages_truncated() {
        let rbsp = [0x05, 0x04, 0xAA];
        assert!(matches!(
            split_messages(&rbsp),
            Err(DemuxError::TruncatedUnit {
                declared: 4,
                available: 1
            })
        ));
    }
}
