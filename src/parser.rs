// Slice-based STOMP frame parser. Works on whatever bytes have been
// buffered so far and reports how far it got when the frame is incomplete,
// so the caller can classify a truncated stream.

use crate::error::StompError;

/// Where parsing stopped when the input ran out mid-frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Still inside the command/header block.
    Header,
    /// Reading a body whose size was declared via `content-length`.
    FixedBody,
    /// Scanning for the NUL terminator of an undeclared body.
    NulBody,
}

/// Outcome of a parse attempt over a byte slice.
#[derive(Debug)]
pub(crate) enum Parsed {
    /// More bytes are required; `Phase` says which part of the frame is
    /// still open.
    Partial(Phase),
    /// A complete frame, plus how many input bytes it consumed.
    Frame {
        command: String,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        consumed: usize,
    },
}

/// Parse a single STOMP frame from the start of `input`.
///
/// The caller is expected to have stripped any blank separator lines in
/// front of the command. Header keys and values are trimmed; the first
/// occurrence of a repeated key governs `content-length` handling. Bodies
/// with a declared length must be followed by a NUL byte; undeclared bodies
/// run to the next NUL, newlines included, with no unescaping. One trailing
/// newline after the NUL is consumed when present.
pub(crate) fn parse_frame(input: &[u8]) -> Result<Parsed, StompError> {
    let len = input.len();

    let Some(cmd_end) = find_lf(input) else {
        return Ok(Parsed::Partial(Phase::Header));
    };
    let command = line_str(&input[..cmd_end])?.to_string();
    let mut pos = cmd_end + 1;

    let mut headers: Vec<(String, String)> = Vec::new();
    let mut content_length: Option<usize> = None;
    loop {
        let Some(line_end) = find_lf(&input[pos..]) else {
            return Ok(Parsed::Partial(Phase::Header));
        };
        let line = line_str(&input[pos..pos + line_end])?;
        pos += line_end + 1;
        if line.is_empty() {
            break;
        }
        let Some(colon) = line.find(':') else {
            return Err(StompError::InvalidFormat(format!(
                "malformed header line: {:?}",
                line
            )));
        };
        let key = line[..colon].trim().to_string();
        let value = line[colon + 1..].trim().to_string();
        // first occurrence of a repeated key wins
        if content_length.is_none() && key.eq_ignore_ascii_case("content-length") {
            let n = value.trim().parse::<usize>().map_err(|_| {
                StompError::InvalidFormat(format!("invalid content-length: {:?}", value))
            })?;
            content_length = Some(n);
        }
        headers.push((key, value));
    }

    let body = match content_length {
        Some(declared) => {
            // need the body plus its NUL terminator
            if len - pos < declared + 1 {
                return Ok(Parsed::Partial(Phase::FixedBody));
            }
            let body = input[pos..pos + declared].to_vec();
            pos += declared;
            if input[pos] != 0 {
                return Err(StompError::InvalidMessageLength);
            }
            pos += 1;
            body
        }
        None => {
            let Some(nul) = input[pos..].iter().position(|&b| b == 0) else {
                return Ok(Parsed::Partial(Phase::NulBody));
            };
            let body = input[pos..pos + nul].to_vec();
            pos += nul + 1;
            body
        }
    };

    // peek one byte past the NUL and consume a trailing newline
    if pos < len && input[pos] == b'\n' {
        pos += 1;
    }

    Ok(Parsed::Frame {
        command,
        headers,
        body,
        consumed: pos,
    })
}

fn find_lf(input: &[u8]) -> Option<usize> {
    input.iter().position(|&b| b == b'\n')
}

/// Decode one line as UTF-8, dropping a trailing CR.
fn line_str(mut line: &[u8]) -> Result<&str, StompError> {
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    std::str::from_utf8(line)
        .map_err(|e| StompError::InvalidFormat(format!("invalid utf8 in frame: {}", e)))
}
