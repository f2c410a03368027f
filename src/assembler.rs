//! Reassembles streamed message bodies.

use crate::backend::BodyStream;
use crate::error::{Error, Result};
use futures::StreamExt;
use mailparse::MailHeaderMap;
use tracing::{debug, instrument};

/// A fully assembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageResult {
    /// Message sequence number.
    pub seq: u32,
    /// Message UID, when known.
    pub uid: Option<u32>,
    /// The raw RFC 5322 message.
    pub payload: Vec<u8>,
}

impl MessageResult {
    /// The payload as text. Invalid UTF-8 sequences are replaced.
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// The decoded `Subject` header, if the headers parse and one is present.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        let (headers, _) = mailparse::parse_headers(&self.payload).ok()?;
        headers.get_first_value("Subject")
    }
}

/// Accumulates one message body into a contiguous buffer.
#[derive(Debug)]
pub struct MessageAssembler {
    seq: u32,
    uid: Option<u32>,
    max_size: Option<usize>,
    buffer: Vec<u8>,
}

impl MessageAssembler {
    /// Creates an assembler for message `seq`. `max_size` of `None` means unbounded.
    #[must_use]
    pub fn new(seq: u32, uid: Option<u32>, max_size: Option<usize>) -> Self {
        Self {
            seq,
            uid,
            max_size,
            buffer: Vec::new(),
        }
    }

    /// Drains `body` and yields the complete message.
    ///
    /// Nothing is yielded on failure; the partial buffer is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BodyStream`] if the stream fails and
    /// [`Error::PayloadTooLarge`] if the body outgrows the size limit.
    #[instrument(name = "MessageAssembler::assemble", skip_all, fields(seq = self.seq))]
    pub async fn assemble(mut self, mut body: BodyStream) -> Result<MessageResult> {
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| Error::BodyStream {
                seq: self.seq,
                source: Box::new(source),
            })?;
            self.push(&chunk)?;
        }

        debug!(bytes = self.buffer.len(), "Message assembled");

        Ok(MessageResult {
            seq: self.seq,
            uid: self.uid,
            payload: self.buffer,
        })
    }

    fn push(&mut self, chunk: &[u8]) -> Result<()> {
        if let Some(limit) = self.max_size {
            if self.buffer.len() + chunk.len() > limit {
                return Err(Error::PayloadTooLarge {
                    seq: self.seq,
                    limit,
                });
            }
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }
}
