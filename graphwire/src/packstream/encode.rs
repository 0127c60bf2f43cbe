use super::{marker, Structure, Value};
use crate::error::{GraphWireError, Result};

/// Encodes values into a plain byte buffer. Pure and synchronous: the chunked framer (§4.B) is
/// the only piece that talks to a socket.
pub struct Encoder;

impl Encoder {
    pub fn encode(value: &Value) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        Self::encode_into(value, &mut out)?;
        Ok(out)
    }

    pub fn encode_into(value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match value {
            Value::Null => out.push(marker::NULL),
            Value::Bool(true) => out.push(marker::TRUE),
            Value::Bool(false) => out.push(marker::FALSE),
            Value::Int(i) => Self::encode_int(*i, out),
            Value::Float(f) => {
                out.push(marker::FLOAT_64);
                out.extend_from_slice(&f.to_be_bytes());
            }
            Value::String(s) => Self::encode_string(s, out)?,
            Value::Bytes(b) => Self::encode_bytes(b, out)?,
            Value::List(items) => Self::encode_list(items, out)?,
            Value::Map(map) => Self::encode_map(map, out)?,
            Value::Structure(s) => Self::encode_structure(s, out)?,
        }
        Ok(())
    }

    fn encode_int(i: i64, out: &mut Vec<u8>) {
        if (marker::TINY_INT_MIN..=marker::TINY_INT_MAX).contains(&i) {
            out.push(i as u8);
        } else if let Ok(v) = i8::try_from(i) {
            out.push(marker::INT_8);
            out.push(v as u8);
        } else if let Ok(v) = i16::try_from(i) {
            out.push(marker::INT_16);
            out.extend_from_slice(&v.to_be_bytes());
        } else if let Ok(v) = i32::try_from(i) {
            out.push(marker::INT_32);
            out.extend_from_slice(&v.to_be_bytes());
        } else {
            out.push(marker::INT_64);
            out.extend_from_slice(&i.to_be_bytes());
        }
    }

    fn encode_string(s: &str, out: &mut Vec<u8>) -> Result<()> {
        let bytes = s.as_bytes();
        let len = bytes.len();
        if len <= 0x0F {
            out.push(marker::TINY_STRING | len as u8);
        } else if len <= u8::MAX as usize {
            out.push(marker::STRING_8);
            out.push(len as u8);
        } else if len <= u16::MAX as usize {
            out.push(marker::STRING_16);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else if len <= u32::MAX as usize {
            out.push(marker::STRING_32);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        } else {
            return Err(GraphWireError::Encode(format!(
                "string of {len} bytes exceeds maximum encodable length"
            )));
        }
        out.extend_from_slice(bytes);
        Ok(())
    }

    fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let len = bytes.len();
        if len <= u8::MAX as usize {
            out.push(marker::BYTES_8);
            out.push(len as u8);
        } else if len <= u16::MAX as usize {
            out.push(marker::BYTES_16);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else if len <= u32::MAX as usize {
            out.push(marker::BYTES_32);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        } else {
            return Err(GraphWireError::Encode(format!(
                "byte string of {len} bytes exceeds maximum encodable length"
            )));
        }
        out.extend_from_slice(bytes);
        Ok(())
    }

    fn encode_list(items: &[Value], out: &mut Vec<u8>) -> Result<()> {
        let len = items.len();
        if len <= 0x0F {
            out.push(marker::TINY_LIST | len as u8);
        } else if len <= u8::MAX as usize {
            out.push(marker::LIST_8);
            out.push(len as u8);
        } else if len <= u16::MAX as usize {
            out.push(marker::LIST_16);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else if len <= u32::MAX as usize {
            out.push(marker::LIST_32);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        } else {
            return Err(GraphWireError::Encode(format!(
                "list of {len} elements exceeds maximum encodable length"
            )));
        }
        for item in items {
            Self::encode_into(item, out)?;
        }
        Ok(())
    }

    fn encode_map(map: &indexmap::IndexMap<String, Value>, out: &mut Vec<u8>) -> Result<()> {
        let len = map.len();
        if len <= 0x0F {
            out.push(marker::TINY_MAP | len as u8);
        } else if len <= u8::MAX as usize {
            out.push(marker::MAP_8);
            out.push(len as u8);
        } else if len <= u16::MAX as usize {
            out.push(marker::MAP_16);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else if len <= u32::MAX as usize {
            out.push(marker::MAP_32);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        } else {
            return Err(GraphWireError::Encode(format!(
                "map of {len} entries exceeds maximum encodable length"
            )));
        }
        for (k, v) in map {
            Self::encode_string(k, out)?;
            Self::encode_into(v, out)?;
        }
        Ok(())
    }

    fn encode_structure(s: &Structure, out: &mut Vec<u8>) -> Result<()> {
        let len = s.fields.len();
        if len > 0x0F {
            return Err(GraphWireError::Encode(format!(
                "structure with {len} fields exceeds the 15-field limit"
            )));
        }
        out.push(marker::TINY_STRUCT | len as u8);
        out.push(s.tag);
        for field in &s.fields {
            Self::encode_into(field, out)?;
        }
        Ok(())
    }
}
