use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::fastcgi::record::{self, Record, HEADER_LENGTH};

/// Decodes a FastCGI record stream over a persistent buffer, rather than
/// re-reading a fresh buffer per call: a record whose content spans more
/// than one TCP read just waits for `decode` to be called again with more
/// bytes appended to the same `BytesMut`.
pub struct FastCgiCodec {
    header: Option<record::Header>,
}

impl FastCgiCodec {
    pub fn new() -> FastCgiCodec {
        FastCgiCodec { header: None }
    }
}

impl Default for FastCgiCodec {
    fn default() -> Self {
        FastCgiCodec::new()
    }
}

impl Decoder for FastCgiCodec {
    type Item = Record;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Record>, std::io::Error> {
        if self.header.is_none() {
            if src.len() < HEADER_LENGTH {
                return Ok(None);
            }
            self.header = Some(record::decode_header(&src[..HEADER_LENGTH]));
            src.advance(HEADER_LENGTH);
        }

        let header = self.header.as_ref().expect("header set above");
        let body_len = header.content_length as usize + header.padding_length as usize;

        if src.len() < body_len {
            return Ok(None);
        }

        let content = src[..header.content_length as usize].to_vec();
        let record_type = header.record_type;
        let request_id = header.request_id;
        src.advance(body_len);
        self.header = None;

        Ok(Some(Record::new(record_type, request_id, content)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fastcgi::record::RecordType;

    #[test]
    fn decodes_nothing_until_a_full_header_is_available() {
        let mut codec = FastCgiCodec::new();
        let mut buf = BytesMut::from(&[1u8, 6, 0, 1][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decodes_a_record_split_across_two_feeds() {
        let mut codec = FastCgiCodec::new();
        let encoded = Record::new(RecordType::Stdout, 1, b"hello".to_vec()).encode();

        let mut buf = BytesMut::from(&encoded[..4]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[4..]);
        let record = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(record.content, b"hello");
        assert_eq!(record.request_id, 1);
    }

    #[test]
    fn leaves_the_next_record_s_bytes_untouched() {
        let mut codec = FastCgiCodec::new();
        let mut encoded = Record::new(RecordType::Stdout, 1, b"a".to_vec()).encode();
        encoded.extend_from_slice(&Record::new(RecordType::Stdout, 1, b"b".to_vec()).encode());

        let mut buf = BytesMut::from(&encoded[..]);
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.content, b"a");
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.content, b"b");
    }
}
