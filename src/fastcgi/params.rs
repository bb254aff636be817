use std::collections::HashMap;

/// Encodes one `(name, value)` pair using the FastCGI length prefix rule:
/// 1 byte if the length is < 128, otherwise 4 bytes big-endian with the
/// high bit of the first byte set.
fn encode_length(buf: &mut Vec<u8>, len: usize) {
    if len < 128 {
        buf.push(len as u8);
    } else {
        let value = (len as u32) | 0x8000_0000;
        buf.extend_from_slice(&value.to_be_bytes());
    }
}

/// Concatenation of `(nameLen, valueLen, name, value)` for every pair.
/// Order is irrelevant on the wire.
pub fn encode_params(params: &HashMap<String, String>) -> Vec<u8> {
    let mut buf = Vec::new();
    for (name, value) in params {
        encode_length(&mut buf, name.len());
        encode_length(&mut buf, value.len());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(value.as_bytes());
    }
    buf
}

#[derive(Debug)]
pub struct ParamsDecodeError(pub String);

fn decode_length(buf: &[u8], pos: &mut usize) -> Result<usize, ParamsDecodeError> {
    let first = *buf.get(*pos).ok_or_else(|| ParamsDecodeError("truncated length prefix".to_string()))?;
    if first & 0x80 == 0 {
        *pos += 1;
        Ok(first as usize)
    } else {
        let bytes = buf.get(*pos..*pos + 4).ok_or_else(|| ParamsDecodeError("truncated 4-byte length prefix".to_string()))?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        raw[0] &= 0x7f;
        *pos += 4;
        Ok(u32::from_be_bytes(raw) as usize)
    }
}

/// Inverse of [`encode_params`]. Tolerates pairs in any order.
pub fn decode_params(buf: &[u8]) -> Result<HashMap<String, String>, ParamsDecodeError> {
    let mut params = HashMap::new();
    let mut pos = 0usize;

    while pos < buf.len() {
        let name_len = decode_length(buf, &mut pos)?;
        let value_len = decode_length(buf, &mut pos)?;

        let name_bytes = buf.get(pos..pos + name_len).ok_or_else(|| ParamsDecodeError("truncated param name".to_string()))?;
        pos += name_len;
        let value_bytes = buf.get(pos..pos + value_len).ok_or_else(|| ParamsDecodeError("truncated param value".to_string()))?;
        pos += value_len;

        let name = String::from_utf8_lossy(name_bytes).into_owned();
        let value = String::from_utf8_lossy(value_bytes).into_owned();
        params.insert(name, value);
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_short_values() {
        let mut params = HashMap::new();
        params.insert("SCRIPT_FILENAME".to_string(), "/var/www/index.php".to_string());
        params.insert("REQUEST_METHOD".to_string(), "GET".to_string());

        let encoded = encode_params(&params);
        let decoded = decode_params(&encoded).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn round_trips_long_value_requiring_four_byte_length() {
        let mut params = HashMap::new();
        let big_value = "x".repeat(10_000);
        params.insert("BIG".to_string(), big_value.clone());

        let encoded = encode_params(&params);
        let decoded = decode_params(&encoded).unwrap();
        assert_eq!(decoded.get("BIG").unwrap(), &big_value);
    }

    #[test]
    fn empty_params_round_trip() {
        let params: HashMap<String, String> = HashMap::new();
        let encoded = encode_params(&params);
        assert!(encoded.is_empty());
        let decoded = decode_params(&encoded).unwrap();
        assert!(decoded.is_empty());
    }
}
