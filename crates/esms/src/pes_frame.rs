//! "PES cutting" section frames: per-PES timings, sizes and build commands.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ts::StreamCodingType;

use crate::commands::BuildCommand;
use crate::{Result, ScriptError, MAX_NB_COMMANDS};

/// Frame flag bits of the `fields_properties` byte.
const FLAG_PTS_LONG: u8 = 0x80;
const FLAG_DTS_PRESENT: u8 = 0x40;
const FLAG_DTS_LONG: u8 = 0x20;
const FLAG_SIZE_LONG: u8 = 0x10;
const FLAG_EXT_DATA: u8 = 0x08;

/// H.264 HRD timing extension data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H264ExtData {
    /// CPB removal time of the access unit, 90 kHz ticks.
    pub cpb_removal_time: u64,
    /// DPB output time of the access unit, 90 kHz ticks.
    pub dpb_output_time: u64,
}

/// Codec-specific PES frame extension data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PesFrameExtData {
    /// H.264 CPB/DPB timing.
    H264(H264ExtData),
}

/// One PES frame description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsmsPesFrame {
    /// Audio extension-frame flag (E-AC-3 dependent substream, TrueHD MLP,
    /// DTS extension substream).
    pub extension_frame: bool,
    /// Presentation timestamp, 90 kHz ticks.
    pub pts: u64,
    /// Decoding timestamp, 90 kHz ticks, when distinct from `pts`.
    pub dts: Option<u64>,
    /// Codec-specific extension data.
    pub ext_data: Option<PesFrameExtData>,
    /// PES payload size in bytes.
    pub size: u32,
    /// Payload build commands, applied in order.
    pub commands: Vec<BuildCommand>,
}

impl EsmsPesFrame {
    /// Effective decoding timestamp (`dts` or `pts`).
    pub fn dts_or_pts(&self) -> u64 {
        self.dts.unwrap_or(self.pts)
    }

    /// Serializes the frame.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        if self.commands.len() > MAX_NB_COMMANDS {
            return Err(ScriptError::TooManyCommands(self.commands.len()));
        }

        /* [v8 frame_prefix] // audio: extension_frame flag */
        out.write_u8((self.extension_frame as u8) << 7)?;

        let pts_long = self.pts > u32::MAX as u64;
        let dts_long = self.dts.is_some_and(|dts| dts > u32::MAX as u64);
        let size_long = self.size > u16::MAX as u32;

        /* [v8 fields_properties] */
        let mut flags = 0u8;
        if pts_long {
            flags |= FLAG_PTS_LONG;
        }
        if self.dts.is_some() {
            flags |= FLAG_DTS_PRESENT;
        }
        if dts_long {
            flags |= FLAG_DTS_LONG;
        }
        if size_long {
            flags |= FLAG_SIZE_LONG;
        }
        if self.ext_data.is_some() {
            flags |= FLAG_EXT_DATA;
        }
        out.write_u8(flags)?;

        /* [u32/64 pts] */
        if pts_long {
            out.write_u64::<BigEndian>(self.pts)?;
        } else {
            out.write_u32::<BigEndian>(self.pts as u32)?;
        }

        /* [u32/64 dts] */
        if let Some(dts) = self.dts {
            if dts_long {
                out.write_u64::<BigEndian>(dts)?;
            } else {
                out.write_u32::<BigEndian>(dts as u32)?;
            }
        }

        if let Some(PesFrameExtData::H264(ext)) = &self.ext_data {
            let long = ext.cpb_removal_time > u32::MAX as u64
                || ext.dpb_output_time > u32::MAX as u64;
            let field = if long { 8 } else { 4 };
            /* [u16 ext_len] [b1 long_fields] [v7 reserved] [un cpb] [un dpb] */
            out.write_u16::<BigEndian>(1 + 2 * field as u16)?;
            out.write_u8((long as u8) << 7)?;
            if long {
                out.write_u64::<BigEndian>(ext.cpb_removal_time)?;
                out.write_u64::<BigEndian>(ext.dpb_output_time)?;
            } else {
                out.write_u32::<BigEndian>(ext.cpb_removal_time as u32)?;
                out.write_u32::<BigEndian>(ext.dpb_output_time as u32)?;
            }
        }

        /* [u16/32 size] */
        if size_long {
            out.write_u32::<BigEndian>(self.size)?;
        } else {
            out.write_u16::<BigEndian>(self.size as u16)?;
        }

        /* [u8 nb_commands] then commands */
        out.write_u8(self.commands.len() as u8)?;
        for command in &self.commands {
            let raw = command.encode_raw();
            if raw.len() > u16::MAX as usize {
                return Err(ScriptError::Memory("command raw data exceeds 64 KiB"));
            }
            out.write_u8(command.type_byte())?;
            out.write_u16::<BigEndian>(raw.len() as u16)?;
            out.write_all(&raw)?;
        }

        Ok(())
    }

    /// Deserializes one frame. `first_byte` is the already-consumed frame
    /// prefix byte (the caller reads it to detect the section end marker).
    pub fn read_from<R: Read>(
        input: &mut R,
        first_byte: u8,
        coding_type: StreamCodingType,
    ) -> Result<Self> {
        let extension_frame = coding_type.is_audio() && (first_byte & 0x80) != 0;

        let flags = input.read_u8()?;
        let pts = if flags & FLAG_PTS_LONG != 0 {
            input.read_u64::<BigEndian>()?
        } else {
            input.read_u32::<BigEndian>()? as u64
        };

        let dts = if flags & FLAG_DTS_PRESENT != 0 {
            Some(if flags & FLAG_DTS_LONG != 0 {
                input.read_u64::<BigEndian>()?
            } else {
                input.read_u32::<BigEndian>()? as u64
            })
        } else {
            None
        };

        let ext_data = if flags & FLAG_EXT_DATA != 0 {
            let ext_len = input.read_u16::<BigEndian>()? as usize;
            if coding_type == StreamCodingType::Avc {
                let ext_flags = input.read_u8()?;
                let field = if ext_flags & 0x80 != 0 { 8 } else { 4 };
                if ext_len < 1 + 2 * field {
                    return Err(ScriptError::Broken(
                        "truncated H.264 extension data".to_string(),
                    ));
                }
                let cpb_removal_time = if field == 8 {
                    input.read_u64::<BigEndian>()?
                } else {
                    input.read_u32::<BigEndian>()? as u64
                };
                let dpb_output_time = if field == 8 {
                    input.read_u64::<BigEndian>()?
                } else {
                    input.read_u32::<BigEndian>()? as u64
                };
                skip_bytes(input, ext_len - 1 - 2 * field)?;
                Some(PesFrameExtData::H264(H264ExtData {
                    cpb_removal_time,
                    dpb_output_time,
                }))
            } else {
                skip_bytes(input, ext_len)?;
                None
            }
        } else {
            None
        };

        let size = if flags & FLAG_SIZE_LONG != 0 {
            input.read_u32::<BigEndian>()?
        } else {
            input.read_u16::<BigEndian>()? as u32
        };

        let nb_commands = input.read_u8()? as usize;
        if nb_commands > MAX_NB_COMMANDS {
            return Err(ScriptError::TooManyCommands(nb_commands));
        }
        let mut commands = Vec::with_capacity(nb_commands);
        for _ in 0..nb_commands {
            let type_byte = input.read_u8()?;
            let raw_len = input.read_u16::<BigEndian>()? as usize;
            let mut raw = vec![0u8; raw_len];
            input.read_exact(&mut raw)?;
            commands.push(BuildCommand::decode_raw(type_byte, &raw)?);
        }

        Ok(EsmsPesFrame {
            extension_frame,
            pts,
            dts,
            ext_data,
            size,
            commands,
        })
    }
}

fn skip_bytes<R: Read>(input: &mut R, len: usize) -> Result<()> {
    let copied = std::io::copy(&mut input.by_ref().take(len as u64), &mut std::io::sink())?;
    if copied < len as u64 {
        return Err(ScriptError::Broken("truncated extension data".to_string()));
    }
    Ok(())
}
