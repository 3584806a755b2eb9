//! Newline-delimited JSON front end for the admission gate.
//!
//! Each input line is an [`AdmissionRequest`]; each output line is the
//! matching [`AdmissionDecision`], or an error object for lines that could not
//! be parsed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::Result;
use crate::gate::AdmissionGate;

/// Longest request line accepted, in bytes, not counting the newline.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// One admission request as read from the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionRequest {
    /// Action class, e.g. `questions`
    pub action: String,
    /// Identity key of the actor
    pub identity: String,
    /// Raw submission payload
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize)]
struct ErrorLine {
    error: String,
}

/// Answer every request line from `reader` on `writer` until end of input.
///
/// Blank lines are skipped. Lines that are not valid requests, including
/// invalid UTF-8 and lines over [`MAX_LINE_BYTES`], get an error line and
/// processing continues. Returns the number of requests answered,
/// including malformed ones.
pub async fn serve_lines<R, W>(gate: &AdmissionGate, mut reader: R, mut writer: W) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut handled = 0;

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            break;
        }

        let mut response = if !buf.ends_with(b"\n") && buf.len() > MAX_LINE_BYTES {
            skip_line(&mut reader).await?;
            warn!(limit = MAX_LINE_BYTES, "Oversized admission request");
            error_line(format!("request line exceeds {} bytes", MAX_LINE_BYTES))?
        } else {
            let line = buf.trim_ascii();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_slice::<AdmissionRequest>(line) {
                Ok(request) => {
                    let decision = gate.check(&request.action, &request.identity, &request.payload);
                    serde_json::to_vec(&decision)?
                }
                Err(e) => {
                    warn!(error = %e, "Malformed admission request");
                    error_line(format!("malformed request: {}", e))?
                }
            }
        };
        response.push(b'\n');

        writer.write_all(&response).await?;
        writer.flush().await?;
        handled += 1;
    }

    debug!(handled = handled, "Input closed");
    Ok(handled)
}

fn error_line(error: String) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&ErrorLine { error })?)
}

/// Discard input up to and including the next newline.
async fn skip_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(());
        }
        match chunk.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = chunk.len();
                reader.consume(len);
            }
        }
    }
}
