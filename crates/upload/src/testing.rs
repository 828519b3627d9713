//! In-memory server used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use stowage_protocol::constants::{CODE_NOT_FOUND, CODE_OK, CODE_WRITING, MessageType};
use stowage_protocol::envelope::Message;
use stowage_protocol::messages::{
    ChunkAckPayload, ChunkHeader, FileRecord, FileRecordPayload, FileRecordQuery,
};

use crate::error::UploadError;
use crate::transport::UploadTransport;

/// How the server answers one chunk.
#[derive(Debug, Clone)]
pub(crate) enum ChunkRule {
    /// Accept the whole chunk.
    Ack,
    /// Accept and report this cursor instead of the chunk end.
    AckAt(u64),
    /// Answer with a non-zero code in the ack payload.
    Reject(i32),
    /// Answer with an error envelope.
    ErrorEnvelope(i32),
    /// No response at all.
    Drop,
    /// A response that is not a valid ack.
    Garbled,
}

/// How the server answers one completion query.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RecordRule {
    Found,
    Writing,
    NotFound,
    Drop,
}

#[derive(Default)]
pub(crate) struct MockServer {
    /// Every chunk header received, in order.
    pub chunks: Mutex<Vec<ChunkHeader>>,
    /// Scripted answers per file name; unscripted chunks are acked.
    chunk_rules: Mutex<HashMap<String, VecDeque<ChunkRule>>>,
    /// Scripted completion answers; unscripted queries find the record.
    record_rules: Mutex<VecDeque<RecordRule>>,
    known: Mutex<HashMap<String, (String, u64)>>,
    pub queries: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    latency: Duration,
    server_rate: Option<u64>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every chunk takes `latency` to be answered.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn with_server_rate(mut self, rate: u64) -> Self {
        self.server_rate = Some(rate);
        self
    }

    pub fn script_chunks(&self, file_name: &str, rules: Vec<ChunkRule>) {
        self.chunk_rules
            .lock()
            .unwrap()
            .insert(file_name.to_string(), rules.into());
    }

    pub fn script_records(&self, rules: Vec<RecordRule>) {
        self.record_rules.lock().unwrap().extend(rules);
    }

    pub fn chunk_log(&self) -> Vec<(String, u64, u64)> {
        self.chunks
            .lock()
            .unwrap()
            .iter()
            .map(|h| (h.file_name.clone(), h.offset, h.length))
            .collect()
    }

    fn answer_chunk(&self, header: &ChunkHeader) -> Result<Message, UploadError> {
        self.chunks.lock().unwrap().push(header.clone());
        self.known.lock().unwrap().insert(
            header.transfer_code.clone(),
            (header.file_name.clone(), header.total_size),
        );

        let rule = self
            .chunk_rules
            .lock()
            .unwrap()
            .get_mut(&header.file_name)
            .and_then(|q| q.pop_front())
            .unwrap_or(ChunkRule::Ack);

        let ack = |code: i32, position: u64| -> Result<Message, UploadError> {
            let payload = ChunkAckPayload {
                code,
                position,
                file_id: None,
            };
            Ok(Message::new("c", MessageType::UploadChunkAck, Some(&payload))?)
        };

        match rule {
            ChunkRule::Ack => ack(CODE_OK, header.offset + header.length),
            ChunkRule::AckAt(position) => ack(CODE_OK, position),
            ChunkRule::Reject(code) => ack(code, 0),
            ChunkRule::ErrorEnvelope(code) => Ok(Message::error("c", code, "denied")),
            ChunkRule::Drop => Err(UploadError::TransmitFailed("no response".into())),
            ChunkRule::Garbled => Ok(Message::new(
                "c",
                MessageType::UploadChunkAck,
                Some(&serde_json::json!({"garbage": true})),
            )?),
        }
    }

    fn answer_query(&self, payload: &serde_json::Value) -> Result<Message, UploadError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let query: FileRecordQuery = serde_json::from_value(payload.clone())?;
        let rule = self
            .record_rules
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RecordRule::Found);

        let reply = match rule {
            RecordRule::Found => {
                let (name, size) = self
                    .known
                    .lock()
                    .unwrap()
                    .get(&query.code)
                    .cloned()
                    .unwrap_or_default();
                FileRecordPayload {
                    code: CODE_OK,
                    record: Some(FileRecord {
                        id: format!("file-{}", &query.code[..8]),
                        name,
                        size,
                        checksum: Some("abc123".into()),
                        average_rate: self.server_rate,
                        last_modified: None,
                    }),
                }
            }
            RecordRule::Writing => FileRecordPayload {
                code: CODE_WRITING,
                record: None,
            },
            RecordRule::NotFound => FileRecordPayload {
                code: CODE_NOT_FOUND,
                record: None,
            },
            RecordRule::Drop => return Err(UploadError::TransmitFailed("no response".into())),
        };
        Ok(Message::new("q", MessageType::FileRecord, Some(&reply))?)
    }
}

impl UploadTransport for MockServer {
    fn send_chunk(
        &self,
        header: &ChunkHeader,
        _data: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<Message, UploadError>> + Send + '_>> {
        let header = header.clone();
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            } else {
                tokio::task::yield_now().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.answer_chunk(&header)
        })
    }

    fn send_request(
        &self,
        msg_type: MessageType,
        payload: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<Message, UploadError>> + Send + '_>> {
        let payload = payload.clone();
        Box::pin(async move {
            match msg_type {
                MessageType::GetFileByCode => self.answer_query(&payload),
                other => Ok(Message::error("q", 400, format!("unexpected {other:?}"))),
            }
        })
    }
}
