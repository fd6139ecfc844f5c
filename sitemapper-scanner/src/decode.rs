//! Content-Encoding handling for fetched bodies.
//!
//! The HTTP client runs with transparent decompression disabled, so every
//! encoding named by the response is undone here, in header order.

use crate::error::{Result, ScanError};
use flate2::read::{MultiGzDecoder, ZlibDecoder};
use reqwest::header::{CONTENT_ENCODING, HeaderMap};
use std::io::Read;
use tracing::debug;

/// Encodings this crawler can undo, advertised in `Accept-Encoding`.
pub const ACCEPT_ENCODING: &str = "gzip, deflate, br, compress";

const BROTLI_BUFFER_SIZE: usize = 4096;
const LZW_LITERAL_WIDTH: u8 = 8;

/// Collect Content-Encoding tokens, across repeated headers and
/// comma-separated lists, lowercased, in the order they appear.
pub fn content_encodings(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONTENT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Apply a decoder for each encoding, first listed first.
///
/// `identity` and unknown tokens leave the body untouched.
pub fn decode_body(body: &[u8], encodings: &[String]) -> Result<Vec<u8>> {
    let mut data = body.to_vec();

    for encoding in encodings {
        data = match encoding.as_str() {
            "gzip" | "x-gzip" => read_all(MultiGzDecoder::new(data.as_slice()), encoding)?,
            "deflate" => read_all(ZlibDecoder::new(data.as_slice()), encoding)?,
            "br" => read_all(
                brotli::Decompressor::new(data.as_slice(), BROTLI_BUFFER_SIZE),
                encoding,
            )?,
            "compress" | "x-compress" => {
                weezl::decode::Decoder::new(weezl::BitOrder::Lsb, LZW_LITERAL_WIDTH)
                    .decode(&data)
                    .map_err(|e| ScanError::DecodeError {
                        encoding: encoding.clone(),
                        reason: e.to_string(),
                    })?
            }
            other => {
                debug!("Leaving content-encoding {:?} as is", other);
                data
            }
        };
    }

    Ok(data)
}

fn read_all<R: Read>(mut reader: R, encoding: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|e| ScanError::DecodeError {
            encoding: encoding.to_string(),
            reason: e.to_string(),
        })?;
    Ok(out)
}
