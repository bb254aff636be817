const VERSION: u8 = 1;
const HEADER_LEN: usize = 8;
const MAX_CONTENT_LEN: usize = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    BeginRequest,
    AbortRequest,
    EndRequest,
    Params,
    Stdin,
    Stdout,
    Stderr,
    Data,
    GetValues,
    GetValuesResult,
    UnknownType,
}

impl RecordType {
    fn to_u8(self) -> u8 {
        match self {
            RecordType::BeginRequest => 1,
            RecordType::AbortRequest => 2,
            RecordType::EndRequest => 3,
            RecordType::Params => 4,
            RecordType::Stdin => 5,
            RecordType::Stdout => 6,
            RecordType::Stderr => 7,
            RecordType::Data => 8,
            RecordType::GetValues => 9,
            RecordType::GetValuesResult => 10,
            RecordType::UnknownType => 11,
        }
    }

    fn from_u8(v: u8) -> RecordType {
        match v {
            1 => RecordType::BeginRequest,
            2 => RecordType::AbortRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            7 => RecordType::Stderr,
            8 => RecordType::Data,
            9 => RecordType::GetValues,
            10 => RecordType::GetValuesResult,
            _ => RecordType::UnknownType,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Responder,
    Authorizer,
    Filter,
}

impl Role {
    fn to_u16(self) -> u16 {
        match self {
            Role::Responder => 1,
            Role::Authorizer => 2,
            Role::Filter => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStatus {
    RequestComplete,
    CantMultiplexConnection,
    Overloaded,
    UnknownRole,
    Unrecognized(u8),
}

impl ProtocolStatus {
    pub fn from_u8(v: u8) -> ProtocolStatus {
        match v {
            0 => ProtocolStatus::RequestComplete,
            1 => ProtocolStatus::CantMultiplexConnection,
            2 => ProtocolStatus::Overloaded,
            3 => ProtocolStatus::UnknownRole,
            other => ProtocolStatus::Unrecognized(other),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            ProtocolStatus::RequestComplete => 0,
            ProtocolStatus::CantMultiplexConnection => 1,
            ProtocolStatus::Overloaded => 2,
            ProtocolStatus::UnknownRole => 3,
            ProtocolStatus::Unrecognized(v) => v,
        }
    }
}

/// One FastCGI record: an 8-byte header plus content, padded to a multiple
/// of 8 bytes. `padding_length` is tracked for `EndRequest`/`BeginRequest`
/// encoding but every other record pads with zero.
#[derive(Debug)]
pub struct Record {
    pub record_type: RecordType,
    pub request_id: u16,
    pub content: Vec<u8>,
}

impl Record {
    pub fn new(record_type: RecordType, request_id: u16, content: Vec<u8>) -> Record {
        Record { record_type, request_id, content }
    }

    pub fn begin_request(request_id: u16, role: Role, keep_conn: bool) -> Record {
        let mut content = Vec::with_capacity(8);
        content.extend_from_slice(&role.to_u16().to_be_bytes());
        content.push(if keep_conn { 1 } else { 0 });
        content.extend_from_slice(&[0u8; 5]);
        Record::new(RecordType::BeginRequest, request_id, content)
    }

    pub fn end_request(request_id: u16, app_status: u32, protocol_status: ProtocolStatus) -> Record {
        let mut content = Vec::with_capacity(8);
        content.extend_from_slice(&app_status.to_be_bytes());
        content.push(protocol_status.to_u8());
        content.extend_from_slice(&[0u8; 3]);
        Record::new(RecordType::EndRequest, request_id, content)
    }

    /// Encodes this record's header and content, zero-padded to a multiple
    /// of 8 bytes. Callers with content over 65535 bytes should use
    /// [`Record::encode_stream`] instead to split into multiple records.
    pub fn encode(&self) -> Vec<u8> {
        encode_one(self.record_type, self.request_id, &self.content)
    }

    /// Splits an arbitrarily long stream payload (`Stdin`/`Stdout`/`Stderr`)
    /// into records of at most 65535 bytes of content each, terminated by
    /// one empty record — matches how a multi-kilobyte PHP response body
    /// has to cross the wire.
    pub fn encode_stream(record_type: RecordType, request_id: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + HEADER_LEN * 2);
        for chunk in payload.chunks(MAX_CONTENT_LEN) {
            out.extend_from_slice(&encode_one(record_type, request_id, chunk));
        }
        out.extend_from_slice(&encode_one(record_type, request_id, &[]));
        out
    }
}

fn encode_one(record_type: RecordType, request_id: u16, content: &[u8]) -> Vec<u8> {
    assert!(content.len() <= MAX_CONTENT_LEN, "fastcgi record content exceeds 65535 bytes");
    let padding = (8 - (content.len() % 8)) % 8;

    let mut buf = Vec::with_capacity(HEADER_LEN + content.len() + padding);
    buf.push(VERSION);
    buf.push(record_type.to_u8());
    buf.extend_from_slice(&request_id.to_be_bytes());
    buf.extend_from_slice(&(content.len() as u16).to_be_bytes());
    buf.push(padding as u8);
    buf.push(0); // reserved
    buf.extend_from_slice(content);
    buf.extend(std::iter::repeat(0u8).take(padding));
    buf
}

pub(crate) struct Header {
    pub record_type: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

pub(crate) fn decode_header(buf: &[u8]) -> Header {
    debug_assert!(buf.len() >= HEADER_LEN);
    Header {
        record_type: RecordType::from_u8(buf[1]),
        request_id: u16::from_be_bytes([buf[2], buf[3]]),
        content_length: u16::from_be_bytes([buf[4], buf[5]]),
        padding_length: buf[6],
    }
}

pub(crate) const HEADER_LENGTH: usize = HEADER_LEN;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_a_header_padded_to_eight_bytes() {
        let record = Record::new(RecordType::Stdin, 1, vec![1, 2, 3]);
        let encoded = record.encode();
        assert_eq!(encoded.len(), HEADER_LEN + 3 + 5);
        assert_eq!(encoded[0], VERSION);
        assert_eq!(encoded[1], RecordType::Stdin.to_u8());
    }

    #[test]
    fn stream_encoding_always_ends_with_an_empty_record() {
        let encoded = Record::encode_stream(RecordType::Stdout, 1, b"hi");
        let header = decode_header(&encoded[encoded.len() - HEADER_LEN..]);
        assert_eq!(header.content_length, 0);
    }

    #[test]
    fn protocol_status_round_trips_through_u8() {
        assert_eq!(ProtocolStatus::from_u8(0), ProtocolStatus::RequestComplete);
        assert_eq!(ProtocolStatus::RequestComplete.to_u8(), 0);
    }
}
