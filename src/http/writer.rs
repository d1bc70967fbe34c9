use tokio::io::AsyncWriteExt;

use crate::http::response::Response;
use crate::transport::Io;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Serialize a response to wire form. `head_only` keeps the status line and
/// headers (Content-Length included) but omits the body bytes, as required
/// for HEAD requests.
pub fn serialize_response(resp: &Response, head_only: bool) -> Vec<u8> {
    let mut buf = Vec::new();

    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    for (k, v) in &resp.headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"\r\n");

    if !head_only && resp.status.allows_body() {
        buf.extend_from_slice(&resp.body);
    }

    buf
}

pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response, head_only: bool) -> Self {
        Self {
            buffer: serialize_response(response, head_only),
            written: 0,
        }
    }

    pub async fn write_to(&mut self, io: &mut dyn Io) -> anyhow::Result<()> {
        while self.written < self.buffer.len() {
            let n = io.write(&self.buffer[self.written..]).await?;

            if n == 0 {
                return Err(anyhow::anyhow!("connection closed while writing"));
            }

            self.written += n;
        }
        io.flush().await?;

        Ok(())
    }
}
