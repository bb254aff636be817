use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Bytes;

pub type RespBody = BoxBody<Bytes, hyper::Error>;

pub fn full<T: Into<Bytes>>(chunk: T) -> RespBody {
    Full::new(chunk.into()).map_err(|never| match never {}).boxed()
}
