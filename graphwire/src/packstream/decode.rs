use indexmap::IndexMap;

use super::{marker, Structure, Value, MAX_CONTAINER_SIZE};
use crate::error::{GraphWireError, Result};

/// A cursor-based recursive-descent decoder over an in-memory message buffer. One `Decoder` is
/// built per framed message (the chunked framer hands it a fully reassembled buffer).
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(GraphWireError::Decode(format!(
                "unexpected end of message: need {n} bytes, have {}",
                self.buf.len() - self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn take_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn take_len(&mut self, n_size_bytes: usize) -> Result<usize> {
        let len = match n_size_bytes {
            1 => self.take_u8()? as usize,
            2 => self.take_u16()? as usize,
            4 => self.take_u32()? as usize,
            _ => unreachable!(),
        };
        if len > MAX_CONTAINER_SIZE {
            return Err(GraphWireError::Decode(format!(
                "container of {len} elements exceeds the {MAX_CONTAINER_SIZE} limit"
            )));
        }
        Ok(len)
    }

    /// Peeks a structure marker and returns `(field_count, tag)` without materializing fields,
    /// so message dispatch can branch on the tag before paying to decode the body.
    pub fn read_structure_header(&mut self) -> Result<(usize, u8)> {
        let marker = self.take_u8()?;
        if (marker::TINY_STRUCT..=marker::TINY_STRUCT | 0x0F).contains(&marker) {
            let size = (marker & 0x0F) as usize;
            let tag = self.take_u8()?;
            Ok((size, tag))
        } else {
            Err(GraphWireError::Decode(format!(
                "expected a structure marker, got 0x{marker:02X}"
            )))
        }
    }

    pub fn read_value(&mut self) -> Result<Value> {
        let marker = self.take_u8()?;
        self.read_value_for_marker(marker)
    }

    fn read_value_for_marker(&mut self, marker: u8) -> Result<Value> {
        use self::marker as m;
        match marker {
            m::NULL => Ok(Value::Null),
            m::TRUE => Ok(Value::Bool(true)),
            m::FALSE => Ok(Value::Bool(false)),
            m::FLOAT_64 => {
                let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
                Ok(Value::Float(f64::from_be_bytes(bytes)))
            }
            m::INT_8 => Ok(Value::Int(self.take_u8()? as i8 as i64)),
            m::INT_16 => {
                let bytes: [u8; 2] = self.take(2)?.try_into().unwrap();
                Ok(Value::Int(i16::from_be_bytes(bytes) as i64))
            }
            m::INT_32 => {
                let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
                Ok(Value::Int(i32::from_be_bytes(bytes) as i64))
            }
            m::INT_64 => {
                let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
                Ok(Value::Int(i64::from_be_bytes(bytes)))
            }
            m::BYTES_8 => {
                let len = self.take_len(1)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            m::BYTES_16 => {
                let len = self.take_len(2)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            m::BYTES_32 => {
                let len = self.take_len(4)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            m::STRING_8 => {
                let len = self.take_len(1)?;
                self.read_string_of(len)
            }
            m::STRING_16 => {
                let len = self.take_len(2)?;
                self.read_string_of(len)
            }
            m::STRING_32 => {
                let len = self.take_len(4)?;
                self.read_string_of(len)
            }
            m::LIST_8 => {
                let len = self.take_len(1)?;
                self.read_list_of(len)
            }
            m::LIST_16 => {
                let len = self.take_len(2)?;
                self.read_list_of(len)
            }
            m::LIST_32 => {
                let len = self.take_len(4)?;
                self.read_list_of(len)
            }
            m::MAP_8 => {
                let len = self.take_len(1)?;
                self.read_map_of(len)
            }
            m::MAP_16 => {
                let len = self.take_len(2)?;
                self.read_map_of(len)
            }
            m::MAP_32 => {
                let len = self.take_len(4)?;
                self.read_map_of(len)
            }
            _ if (0x00..=0x7F).contains(&marker) || (0xF0..=0xFF).contains(&marker) => {
                Ok(Value::Int(marker as i8 as i64))
            }
            _ if (m::TINY_STRING..=m::TINY_STRING | 0x0F).contains(&marker) => {
                self.read_string_of((marker & 0x0F) as usize)
            }
            _ if (m::TINY_LIST..=m::TINY_LIST | 0x0F).contains(&marker) => {
                self.read_list_of((marker & 0x0F) as usize)
            }
            _ if (m::TINY_MAP..=m::TINY_MAP | 0x0F).contains(&marker) => {
                self.read_map_of((marker & 0x0F) as usize)
            }
            _ if (m::TINY_STRUCT..=m::TINY_STRUCT | 0x0F).contains(&marker) => {
                let size = (marker & 0x0F) as usize;
                let tag = self.take_u8()?;
                let mut fields = Vec::with_capacity(size);
                for _ in 0..size {
                    fields.push(self.read_value()?);
                }
                Ok(Value::Structure(Structure::new(tag, fields)))
            }
            other => Err(GraphWireError::Decode(format!(
                "unknown packstream marker 0x{other:02X}"
            ))),
        }
    }

    fn read_string_of(&mut self, len: usize) -> Result<Value> {
        let bytes = self.take(len)?.to_vec();
        Ok(Value::String(String::from_utf8(bytes)?))
    }

    fn read_list_of(&mut self, len: usize) -> Result<Value> {
        let mut items = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            items.push(self.read_value()?);
        }
        Ok(Value::List(items))
    }

    fn read_map_of(&mut self, len: usize) -> Result<Value> {
        let mut map = IndexMap::with_capacity(len.min(4096));
        for _ in 0..len {
            let key = match self.read_value()? {
                Value::String(s) => s,
                other => {
                    return Err(GraphWireError::Decode(format!(
                        "map keys must be strings, got {other:?}"
                    )))
                }
            };
            let value = self.read_value()?;
            // Duplicate keys are undefined behavior per spec, not a decode error: last write wins.
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }
}
