//! Lazy decoding of `googleAds:searchStream` responses.
//!
//! The endpoint answers with a JSON array of chunks, each carrying a batch of
//! `results`. [`CostRowStream`] pulls body bytes only when its buffered rows
//! run out, so the consumer finishes with one row before the next is read.
//! The sequence is finite and cannot be restarted.

use super::AdsError;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Deserializer};
use std::collections::VecDeque;
use std::ops::Range;
use tokio_util::sync::CancellationToken;

/// One `(ad, date, cost)` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostRow {
    pub ad_id: i64,
    pub date: NaiveDate,
    pub cost_micros: i64,
}

/// A finite, non-restartable sequence of cost rows.
#[async_trait]
pub trait CostRows: Send {
    /// The next row, an error, or `None` once exhausted. After an error or
    /// `None` every later call returns `None`.
    async fn next_row(&mut self, cancel: &CancellationToken) -> Option<Result<CostRow, AdsError>>;
}

#[derive(Deserialize)]
struct SearchChunk {
    #[serde(default)]
    results: Vec<SearchRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRow {
    #[serde(alias = "ad_group_ad")]
    ad_group_ad: AdGroupAd,
    segments: Segments,
    #[serde(default)]
    metrics: Metrics,
}

#[derive(Deserialize)]
struct AdGroupAd {
    ad: Ad,
}

#[derive(Deserialize)]
struct Ad {
    #[serde(deserialize_with = "int64")]
    id: i64,
}

#[derive(Deserialize)]
struct Segments {
    date: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Metrics {
    #[serde(default, alias = "cost_micros", deserialize_with = "int64")]
    cost_micros: i64,
}

/// The API encodes int64 as a JSON string; plain numbers are accepted too.
fn int64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Number(i64),
        Text(String),
    }

    match Int64::deserialize(deserializer)? {
        Int64::Number(n) => Ok(n),
        Int64::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

impl TryFrom<SearchRow> for CostRow {
    type Error = AdsError;

    fn try_from(row: SearchRow) -> Result<Self, Self::Error> {
        let date = row
            .segments
            .date
            .parse()
            .map_err(|_| AdsError::Decode(format!("invalid segments.date '{}'", row.segments.date)))?;
        Ok(CostRow {
            ad_id: row.ad_group_ad.ad.id,
            date,
            cost_micros: row.metrics.cost_micros,
        })
    }
}

/// Cost rows decoded incrementally from a response body.
pub struct CostRowStream {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    buffer: Vec<u8>,
    scanner: ChunkScanner,
    pending: VecDeque<CostRow>,
    finished: bool,
}

impl CostRowStream {
    pub fn new(body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            scanner: ChunkScanner::default(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    pub fn from_response(response: reqwest::Response) -> Self {
        Self::new(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
        )
    }

    /// Next row, reading more of the body only when nothing is buffered.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<Result<CostRow, AdsError>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            if self.finished {
                return None;
            }

            match self.decode_buffered() {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => return Some(Err(self.fail(e))),
            }

            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Some(Err(self.fail(AdsError::Cancelled))),
                chunk = self.body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => return Some(Err(self.fail(AdsError::Transport(e)))),
                None => {
                    self.finished = true;
                    if self.buffer.iter().any(|b| !is_framing(*b)) {
                        return Some(Err(AdsError::Decode(
                            "search stream ended mid-chunk".to_string(),
                        )));
                    }
                    return None;
                }
            }
        }
    }

    /// Decodes one complete chunk from the buffer, if present. Returns
    /// whether anything was consumed.
    fn decode_buffered(&mut self) -> Result<bool, AdsError> {
        let Some(span) = self.scanner.scan(&self.buffer)? else {
            if self.scanner.is_idle() {
                self.buffer.clear();
                self.scanner = ChunkScanner::default();
            }
            return Ok(false);
        };

        let chunk: SearchChunk = serde_json::from_slice(&self.buffer[span.clone()])
            .map_err(|e| AdsError::Decode(e.to_string()))?;
        self.buffer.drain(..span.end);
        self.scanner = ChunkScanner::default();

        for row in chunk.results {
            self.pending.push_back(CostRow::try_from(row)?);
        }
        Ok(true)
    }

    fn fail(&mut self, error: AdsError) -> AdsError {
        self.finished = true;
        self.pending.clear();
        self.buffer.clear();
        self.scanner = ChunkScanner::default();
        error
    }
}

/// Locates the end of the next top-level chunk object.
///
/// Scanning resumes at `offset` on every call, so each body byte is looked
/// at once no matter how the body is split.
#[derive(Debug, Default)]
struct ChunkScanner {
    start: Option<usize>,
    offset: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl ChunkScanner {
    /// Byte range of the first complete chunk in `buf`, if it has arrived.
    fn scan(&mut self, buf: &[u8]) -> Result<Option<Range<usize>>, AdsError> {
        while self.offset < buf.len() {
            let byte = buf[self.offset];
            self.offset += 1;

            let Some(start) = self.start else {
                if is_framing(byte) {
                    continue;
                }
                if byte != b'{' {
                    return Err(AdsError::Decode(format!(
                        "unexpected '{}' between search stream chunks",
                        char::from(byte)
                    )));
                }
                self.start = Some(self.offset - 1);
                self.depth = 1;
                continue;
            };

            if self.in_string {
                match byte {
                    _ if self.escaped => self.escaped = false,
                    b'\\' => self.escaped = true,
                    b'"' => self.in_string = false,
                    _ => {}
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Ok(Some(start..self.offset));
                    }
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// Nothing but framing has been seen so far.
    fn is_idle(&self) -> bool {
        self.start.is_none()
    }
}

/// Array brackets, separators and whitespace between chunks.
fn is_framing(byte: u8) -> bool {
    matches!(byte, b'[' | b']' | b',') || byte.is_ascii_whitespace()
}

#[async_trait]
impl CostRows for CostRowStream {
    async fn next_row(&mut self, cancel: &CancellationToken) -> Option<Result<CostRow, AdsError>> {
        self.next(cancel).await
    }
}
