use std::collections::HashMap;

use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::fastcgi::codec::FastCgiCodec;
use crate::fastcgi::params::decode_params;
use crate::fastcgi::record::RecordType;
use futures::StreamExt;

pub struct IncomingRequest {
    pub request_id: u16,
    pub params: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Server-role read of one request: a `BeginRequest`, then `Params` records
/// until an empty one, then `Stdin` records until an empty one. Used by the
/// pool's own tests to stand in for a PHP-CGI child without spawning one.
pub async fn read_request<S>(stream: &mut S) -> std::io::Result<IncomingRequest>
where
    S: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(stream, FastCgiCodec::new());
    let mut request_id = 0u16;
    let mut params_buf = Vec::new();
    let mut body = Vec::new();

    loop {
        let record = framed.next().await.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed mid-request"))??;

        match record.record_type {
            RecordType::BeginRequest => request_id = record.request_id,
            RecordType::Params => {
                if record.content.is_empty() {
                    continue;
                }
                params_buf.extend(record.content);
            }
            RecordType::Stdin => {
                if record.content.is_empty() {
                    break;
                }
                body.extend(record.content);
            }
            _ => continue,
        }
    }

    let params = decode_params(&params_buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.0))?;
    Ok(IncomingRequest { request_id, params, body })
}
