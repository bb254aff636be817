use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;

use crate::error::tq_error::TqError;
use crate::error::tq_error_enums::{FastCgiError, TqErrorKind};
use crate::fastcgi::codec::FastCgiCodec;
use crate::fastcgi::params::encode_params;
use crate::fastcgi::record::{ProtocolStatus, Record, RecordType, Role};
use futures::StreamExt;

pub struct FastCgiResponse {
    pub app_status: u32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Client-role dispatch: one request/response cycle over an already
/// connected duplex stream to a FastCGI application (a PHP pool child).
/// Sends `BeginRequest`, `Params`, `Stdin`, then reads records until
/// `EndRequest`, concatenating Stdout and buffering Stderr for logging.
pub async fn send_request<S>(stream: &mut S, request_id: u16, params: &HashMap<String, String>, body: &[u8], keep_conn: bool) -> Result<FastCgiResponse, TqError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_request(stream, request_id, params, body, keep_conn).await.map_err(|e| TqError::new(TqErrorKind::FastCgiProtocol(FastCgiError::Communication), e.to_string()))?;

    read_response(stream, request_id).await
}

async fn write_request<S: AsyncWrite + Unpin>(stream: &mut S, request_id: u16, params: &HashMap<String, String>, body: &[u8], keep_conn: bool) -> std::io::Result<()> {
    stream.write_all(&Record::begin_request(request_id, Role::Responder, keep_conn).encode()).await?;
    stream.write_all(&Record::new(RecordType::Params, request_id, encode_params(params)).encode()).await?;
    stream.write_all(&Record::new(RecordType::Params, request_id, Vec::new()).encode()).await?;
    stream.write_all(&Record::encode_stream(RecordType::Stdin, request_id, body)).await?;
    stream.flush().await
}

async fn read_response<S: AsyncRead + Unpin>(stream: &mut S, request_id: u16) -> Result<FastCgiResponse, TqError> {
    let mut framed = FramedRead::new(stream, FastCgiCodec::new());
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    loop {
        let record = framed
            .next()
            .await
            .ok_or_else(|| TqError::new(TqErrorKind::FastCgiProtocol(FastCgiError::Connection), "connection closed before EndRequest".to_string()))?
            .map_err(|e| TqError::new(TqErrorKind::FastCgiProtocol(FastCgiError::Communication), e.to_string()))?;

        if record.request_id != request_id {
            continue;
        }

        match record.record_type {
            RecordType::Stdout => stdout.extend(record.content),
            RecordType::Stderr => stderr.extend(record.content),
            RecordType::EndRequest => {
                if record.content.len() < 5 {
                    return Err(TqError::new(TqErrorKind::FastCgiProtocol(FastCgiError::Framing), "truncated EndRequest".to_string()));
                }
                let app_status = u32::from_be_bytes(record.content[0..4].try_into().unwrap());
                let protocol_status = ProtocolStatus::from_u8(record.content[4]);
                if !matches!(protocol_status, ProtocolStatus::RequestComplete) {
                    return Err(TqError::new(TqErrorKind::FastCgiProtocol(FastCgiError::Internal), format!("protocol status {:?}", protocol_status)));
                }
                return Ok(FastCgiResponse { app_status, stdout, stderr });
            }
            RecordType::UnknownType => continue,
            other => {
                return Err(TqError::new(TqErrorKind::FastCgiProtocol(FastCgiError::Framing), format!("unexpected record type {:?} in response", other)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_simple_request_against_a_fake_fastcgi_server() {
        let (mut client, mut server) = duplex(1 << 20);

        let server_task = tokio::spawn(async move {
            let request = crate::fastcgi::reader::read_request(&mut server).await.unwrap();
            assert_eq!(request.params.get("REQUEST_METHOD").unwrap(), "GET");

            server.write_all(&Record::encode_stream(RecordType::Stdout, request.request_id, b"Status: 200 OK\r\n\r\nhello")).await.unwrap();
            server.write_all(&Record::end_request(request.request_id, 0, ProtocolStatus::RequestComplete).encode()).await.unwrap();
            server.flush().await.unwrap();
        });

        let mut params = HashMap::new();
        params.insert("REQUEST_METHOD".to_string(), "GET".to_string());

        let response = send_request(&mut client, 1, &params, b"", false).await.unwrap();
        server_task.await.unwrap();

        assert_eq!(response.app_status, 0);
        assert!(String::from_utf8_lossy(&response.stdout).contains("hello"));
    }
}
