//! PES payload build commands.
//!
//! Each PES frame carries an ordered list of at most 32 commands. Applying
//! the list to a zero-filled buffer of the declared payload size yields the
//! exact payload bytes, deterministically.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{Result, ScriptError};

/// Byte insertion behaviour at the destination offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InsertMode {
    /// Replace bytes in place.
    Overwrite = 0x0,
    /// Shift following bytes towards the end of the buffer.
    Insert = 0x1,
}

impl InsertMode {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(InsertMode::Overwrite),
            0x1 => Ok(InsertMode::Insert),
            other => Err(ScriptError::Broken(format!(
                "unknown insertion mode {other}"
            ))),
        }
    }
}

/// A source of payload bytes addressed by `AddPayload` commands.
pub trait PayloadSource {
    /// Fills `buf` from `offset` bytes into the source.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()>;
}

impl PayloadSource for File {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }
}

/// In-memory source, used by tests and the HDMV re-timing path.
impl PayloadSource for &[u8] {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        let offset = offset as usize;
        if offset + buf.len() > self.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "source slice exhausted",
            ));
        }
        buf.copy_from_slice(&self[offset..offset + buf.len()]);
        Ok(())
    }
}

/// One PES payload build command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildCommand {
    /// Put literal bytes at `offset`.
    AddData {
        /// Destination offset inside the payload.
        offset: u32,
        /// Insertion behaviour.
        mode: InsertMode,
        /// Bytes to place.
        data: Vec<u8>,
    },
    /// Reverse byte order of each `unit_size`-byte group inside a region.
    ChangeByteOrder {
        /// Integer unit size in bytes.
        unit_size: u8,
        /// Region start offset.
        offset: u32,
        /// Region length in bytes (multiple of `unit_size`).
        length: u32,
    },
    /// Copy a byte range from a source file.
    AddPayload {
        /// Source file index.
        file_id: u8,
        /// Destination offset inside the payload.
        offset: u32,
        /// Source byte offset.
        src_offset: u64,
        /// Number of bytes to copy.
        size: u32,
    },
    /// Fill a region with a constant byte.
    AddPadding {
        /// Destination offset inside the payload.
        offset: u32,
        /// Insertion behaviour.
        mode: InsertMode,
        /// Region length.
        length: u32,
        /// Filling byte.
        filling_byte: u8,
    },
    /// Splice a script data block.
    AddDataBlock {
        /// Data block index.
        block_id: u8,
        /// Destination offset inside the payload.
        offset: u32,
        /// Insertion behaviour.
        mode: InsertMode,
    },
}

impl BuildCommand {
    /// Command type byte.
    pub fn type_byte(&self) -> u8 {
        match self {
            BuildCommand::AddData { .. } => 0x00,
            BuildCommand::ChangeByteOrder { .. } => 0x01,
            BuildCommand::AddPayload { .. } => 0x02,
            BuildCommand::AddPadding { .. } => 0x03,
            BuildCommand::AddDataBlock { .. } => 0x04,
        }
    }

    /// Encodes the command raw payload (the bytes after the type and
    /// raw-size fields).
    pub fn encode_raw(&self) -> Vec<u8> {
        let mut raw = Vec::new();
        match self {
            BuildCommand::AddData { offset, mode, data } => {
                raw.write_u32::<BigEndian>(*offset)
                    .expect("Vec<u8> write is infallible");
                raw.push(*mode as u8);
                raw.extend_from_slice(data);
            }
            BuildCommand::ChangeByteOrder {
                unit_size,
                offset,
                length,
            } => {
                raw.push(*unit_size);
                raw.write_u32::<BigEndian>(*offset)
                    .expect("Vec<u8> write is infallible");
                raw.write_u32::<BigEndian>(*length)
                    .expect("Vec<u8> write is infallible");
            }
            BuildCommand::AddPayload {
                file_id,
                offset,
                src_offset,
                size,
            } => {
                let offset_ext = *src_offset > u32::MAX as u64;
                let size_ext = *size > u16::MAX as u32;
                raw.push(((offset_ext as u8) << 7) | ((size_ext as u8) << 6));
                raw.push(*file_id);
                raw.write_u32::<BigEndian>(*offset)
                    .expect("Vec<u8> write is infallible");
                raw.write_u32::<BigEndian>(*src_offset as u32)
                    .expect("Vec<u8> write is infallible");
                if offset_ext {
                    raw.write_u32::<BigEndian>((*src_offset >> 32) as u32)
                        .expect("Vec<u8> write is infallible");
                }
                raw.write_u16::<BigEndian>(*size as u16)
                    .expect("Vec<u8> write is infallible");
                if size_ext {
                    raw.write_u16::<BigEndian>((*size >> 16) as u16)
                        .expect("Vec<u8> write is infallible");
                }
            }
            BuildCommand::AddPadding {
                offset,
                mode,
                length,
                filling_byte,
            } => {
                raw.write_u32::<BigEndian>(*offset)
                    .expect("Vec<u8> write is infallible");
                raw.push(*mode as u8);
                raw.write_u32::<BigEndian>(*length)
                    .expect("Vec<u8> write is infallible");
                raw.push(*filling_byte);
            }
            BuildCommand::AddDataBlock {
                block_id,
                offset,
                mode,
            } => {
                raw.write_u32::<BigEndian>(*offset)
                    .expect("Vec<u8> write is infallible");
                raw.push(*mode as u8);
                raw.push(*block_id);
            }
        }
        raw
    }

    /// Decodes a command from its type byte and raw payload.
    pub fn decode_raw(type_byte: u8, raw: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(raw);
        match type_byte {
            0x00 => {
                let offset = cursor.read_u32::<BigEndian>()?;
                let mode = InsertMode::from_u8(cursor.read_u8()?)?;
                let data = raw[cursor.position() as usize..].to_vec();
                if data.is_empty() {
                    return Err(ScriptError::Broken(
                        "empty \"Add data\" command".to_string(),
                    ));
                }
                Ok(BuildCommand::AddData { offset, mode, data })
            }
            0x01 => {
                let unit_size = cursor.read_u8()?;
                let offset = cursor.read_u32::<BigEndian>()?;
                let length = cursor.read_u32::<BigEndian>()?;
                if unit_size == 0 {
                    return Err(ScriptError::Broken(
                        "zero unit size in \"Change byte order\" command".to_string(),
                    ));
                }
                Ok(BuildCommand::ChangeByteOrder {
                    unit_size,
                    offset,
                    length,
                })
            }
            0x02 => {
                let flags = cursor.read_u8()?;
                let file_id = cursor.read_u8()?;
                let offset = cursor.read_u32::<BigEndian>()?;
                let mut src_offset = cursor.read_u32::<BigEndian>()? as u64;
                if flags & 0x80 != 0 {
                    src_offset |= (cursor.read_u32::<BigEndian>()? as u64) << 32;
                }
                let mut size = cursor.read_u16::<BigEndian>()? as u32;
                if flags & 0x40 != 0 {
                    size |= (cursor.read_u16::<BigEndian>()? as u32) << 16;
                }
                Ok(BuildCommand::AddPayload {
                    file_id,
                    offset,
                    src_offset,
                    size,
                })
            }
            0x03 => {
                let offset = cursor.read_u32::<BigEndian>()?;
                let mode = InsertMode::from_u8(cursor.read_u8()?)?;
                let length = cursor.read_u32::<BigEndian>()?;
                let filling_byte = cursor.read_u8()?;
                Ok(BuildCommand::AddPadding {
                    offset,
                    mode,
                    length,
                    filling_byte,
                })
            }
            0x04 => {
                let offset = cursor.read_u32::<BigEndian>()?;
                let mode = InsertMode::from_u8(cursor.read_u8()?)?;
                let block_id = cursor.read_u8()?;
                Ok(BuildCommand::AddDataBlock {
                    block_id,
                    offset,
                    mode,
                })
            }
            other => Err(ScriptError::UnknownCommand(other)),
        }
    }
}

/// Places `data` into `payload` at `offset` with the requested mode.
fn place_bytes(
    payload: &mut [u8],
    offset: usize,
    mode: InsertMode,
    data: &[u8],
) -> Result<()> {
    if offset + data.len() > payload.len() {
        return Err(ScriptError::CommandOutOfBounds {
            offset,
            len: data.len(),
            payload: payload.len(),
        });
    }
    if mode == InsertMode::Insert {
        payload.copy_within(offset..payload.len() - data.len(), offset + data.len());
    }
    payload[offset..offset + data.len()].copy_from_slice(data);
    Ok(())
}

/// Applies a command list to a zeroed buffer of `payload_size` bytes.
pub fn apply_commands<S: PayloadSource>(
    commands: &[BuildCommand],
    payload_size: u32,
    data_blocks: &[Vec<u8>],
    sources: &mut [S],
) -> Result<Vec<u8>> {
    let mut payload = vec![0u8; payload_size as usize];

    for command in commands {
        match command {
            BuildCommand::AddData { offset, mode, data } => {
                place_bytes(&mut payload, *offset as usize, *mode, data)?;
            }
            BuildCommand::ChangeByteOrder {
                unit_size,
                offset,
                length,
            } => {
                let offset = *offset as usize;
                let length = *length as usize;
                let unit = *unit_size as usize;
                if offset + length > payload.len() {
                    return Err(ScriptError::CommandOutOfBounds {
                        offset,
                        len: length,
                        payload: payload.len(),
                    });
                }
                if unit == 0 || length % unit != 0 {
                    return Err(ScriptError::Broken(format!(
                        "byte-order swap region {length} not a multiple of unit {unit}"
                    )));
                }
                for chunk in payload[offset..offset + length].chunks_exact_mut(unit) {
                    chunk.reverse();
                }
            }
            BuildCommand::AddPayload {
                file_id,
                offset,
                src_offset,
                size,
            } => {
                let offset = *offset as usize;
                let size = *size as usize;
                if offset + size > payload.len() {
                    return Err(ScriptError::CommandOutOfBounds {
                        offset,
                        len: size,
                        payload: payload.len(),
                    });
                }
                let source = sources.get_mut(*file_id as usize).ok_or_else(|| {
                    ScriptError::Broken(format!("unknown source file index {file_id}"))
                })?;
                source.read_at(*src_offset, &mut payload[offset..offset + size])?;
            }
            BuildCommand::AddPadding {
                offset,
                mode,
                length,
                filling_byte,
            } => {
                let data = vec![*filling_byte; *length as usize];
                place_bytes(&mut payload, *offset as usize, *mode, &data)?;
            }
            BuildCommand::AddDataBlock {
                block_id,
                offset,
                mode,
            } => {
                let block = data_blocks.get(*block_id as usize).ok_or_else(|| {
                    ScriptError::Broken(format!("unknown data block index {block_id}"))
                })?;
                place_bytes(&mut payload, *offset as usize, *mode, block)?;
            }
        }
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(command: BuildCommand) -> BuildCommand {
        let raw = command.encode_raw();
        BuildCommand::decode_raw(command.type_byte(), &raw).unwrap()
    }

    #[test]
    fn test_commands_round_trip() {
        let commands = [
            BuildCommand::AddData {
                offset: 4,
                mode: InsertMode::Overwrite,
                data: vec![1, 2, 3],
            },
            BuildCommand::ChangeByteOrder {
                unit_size: 2,
                offset: 0,
                length: 8,
            },
            BuildCommand::AddPayload {
                file_id: 1,
                offset: 10,
                src_offset: 0x1_2345_6789,
                size: 0x2_0001,
            },
            BuildCommand::AddPadding {
                offset: 0,
                mode: InsertMode::Insert,
                length: 16,
                filling_byte: 0xAA,
            },
            BuildCommand::AddDataBlock {
                block_id: 3,
                offset: 2,
                mode: InsertMode::Overwrite,
            },
        ];
        for command in commands {
            assert_eq!(round_trip(command.clone()), command);
        }
    }

    #[test]
    fn test_add_payload_extension_fields() {
        // Small offsets/sizes stay in the short form.
        let small = BuildCommand::AddPayload {
            file_id: 0,
            offset: 0,
            src_offset: 100,
            size: 200,
        };
        assert_eq!(small.encode_raw().len(), 12);

        let large = BuildCommand::AddPayload {
            file_id: 0,
            offset: 0,
            src_offset: u32::MAX as u64 + 1,
            size: u16::MAX as u32 + 1,
        };
        assert_eq!(large.encode_raw().len(), 18);
        assert_eq!(round_trip(large.clone()), large);
    }

    #[test]
    fn test_apply_overwrite_and_swap() {
        let commands = [
            BuildCommand::AddData {
                offset: 0,
                mode: InsertMode::Overwrite,
                data: vec![0x11, 0x22, 0x33, 0x44],
            },
            BuildCommand::ChangeByteOrder {
                unit_size: 2,
                offset: 0,
                length: 4,
            },
        ];
        let payload =
            apply_commands::<&[u8]>(&commands, 4, &[], &mut []).unwrap();
        assert_eq!(payload, vec![0x22, 0x11, 0x44, 0x33]);
    }

    #[test]
    fn test_apply_insert_shifts_tail() {
        let commands = [
            BuildCommand::AddData {
                offset: 0,
                mode: InsertMode::Overwrite,
                data: vec![1, 2, 3, 4],
            },
            BuildCommand::AddData {
                offset: 1,
                mode: InsertMode::Insert,
                data: vec![9, 9],
            },
        ];
        let payload =
            apply_commands::<&[u8]>(&commands, 6, &[], &mut []).unwrap();
        assert_eq!(payload, vec![1, 9, 9, 2, 3, 4]);
    }

    #[test]
    fn test_apply_payload_from_source() {
        let source: &[u8] = &[0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5];
        let commands = [BuildCommand::AddPayload {
            file_id: 0,
            offset: 1,
            src_offset: 2,
            size: 3,
        }];
        let payload = apply_commands(&commands, 5, &[], &mut [source]).unwrap();
        assert_eq!(payload, vec![0x00, 0xA2, 0xA3, 0xA4, 0x00]);
    }

    #[test]
    fn test_apply_data_block_and_padding() {
        let blocks = vec![vec![0xDE, 0xAD]];
        let commands = [
            BuildCommand::AddPadding {
                offset: 0,
                mode: InsertMode::Overwrite,
                length: 6,
                filling_byte: 0xFF,
            },
            BuildCommand::AddDataBlock {
                block_id: 0,
                offset: 2,
                mode: InsertMode::Overwrite,
            },
        ];
        let payload =
            apply_commands::<&[u8]>(&commands, 6, &blocks, &mut []).unwrap();
        assert_eq!(payload, vec![0xFF, 0xFF, 0xDE, 0xAD, 0xFF, 0xFF]);
    }

    #[test]
    fn test_out_of_bounds_command() {
        let commands = [BuildCommand::AddData {
            offset: 3,
            mode: InsertMode::Overwrite,
            data: vec![0, 0],
        }];
        assert!(matches!(
            apply_commands::<&[u8]>(&commands, 4, &[], &mut []),
            Err(ScriptError::CommandOutOfBounds { .. })
        ));
    }
}
