//! Directory-backed store answering the upload protocol in process.
//!
//! Requests travel as JSON envelopes, the way a JSON-only connection would
//! carry them. Chunks are appended to `<code>.part` files; the last chunk of
//! a transfer moves the part file to its final name and registers the file
//! record that completion queries return.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use stowage_protocol::constants::{
    CODE_BAD_REQUEST, CODE_CONFLICT, CODE_INTERNAL, CODE_NOT_FOUND, CODE_OK, MessageType,
};
use stowage_protocol::envelope::Message;
use stowage_protocol::messages::{
    ChunkAckPayload, ChunkHeader, FileRecord, FileRecordPayload, FileRecordQuery,
    UploadChunkRequest,
};
use stowage_transfer::checksum_bytes;
use stowage_upload::{UploadError, UploadTransport};
use tracing::{debug, info, warn};

struct StoreInner {
    root: PathBuf,
    /// Finished files keyed by transfer code.
    records: Mutex<HashMap<String, FileRecord>>,
    next_id: AtomicU64,
}

/// In-process server writing uploads below `root`.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

impl LocalStore {
    /// Opens (and creates if needed) the store directory.
    pub fn open(root: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                root: root.to_path_buf(),
                records: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    fn dispatch(
        &self,
        request: Result<Message, serde_json::Error>,
    ) -> Pin<Box<dyn Future<Output = Result<Message, UploadError>> + Send + '_>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let request = request?;
            tokio::task::spawn_blocking(move || inner.handle(&request))
                .await
                .map_err(|e| UploadError::TransmitFailed(format!("store task failed: {e}")))
        })
    }

    fn next_message_id(&self) -> String {
        format!("s-{}", self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl StoreInner {
    fn handle(&self, request: &Message) -> Message {
        let reply = match request.msg_type {
            MessageType::UploadChunk => self.handle_chunk(request),
            MessageType::GetFileByCode => self.handle_query(request),
            ref other => {
                return request
                    .reply_error(CODE_BAD_REQUEST, format!("unsupported request {other:?}"));
            }
        };
        reply.unwrap_or_else(|e| {
            warn!(request = %request.id, error = %e, "store failure");
            request.reply_error(CODE_INTERNAL, e.to_string())
        })
    }

    fn handle_chunk(&self, request: &Message) -> std::io::Result<Message> {
        let Ok(Some(UploadChunkRequest { header, data })) =
            request.parse_payload::<UploadChunkRequest>()
        else {
            return Ok(request.reply_error(CODE_BAD_REQUEST, "malformed chunk request"));
        };

        let Some(name) = plain_file_name(&header.file_name) else {
            warn!(file = %header.file_name, "rejecting unsafe file name");
            return Ok(request.reply_error(CODE_BAD_REQUEST, "unsafe file name"));
        };
        if !is_valid_code(&header.transfer_code) {
            warn!(file = %name, "rejecting malformed transfer code");
            return Ok(request.reply_error(CODE_BAD_REQUEST, "malformed transfer code"));
        }
        if !header.checksum.is_empty() && checksum_bytes(&data) != header.checksum {
            warn!(file = %name, offset = header.offset, "chunk checksum mismatch");
            return Ok(request.reply_error(CODE_BAD_REQUEST, "checksum mismatch"));
        }
        if header.offset == 0 && self.name_taken(name, &header.transfer_code) {
            warn!(file = %name, "name already stored by another transfer");
            return Ok(request.reply_error(CODE_CONFLICT, "name already stored"));
        }

        let part = self.root.join(format!("{}.part", header.transfer_code));
        let written = match std::fs::metadata(&part) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        // Offset zero restarts an abandoned transfer with the same code.
        if header.offset != 0 && header.offset != written {
            warn!(
                file = %name,
                offset = header.offset,
                written,
                "chunk does not continue the part file"
            );
            return Ok(request.reply_error(CODE_CONFLICT, "chunk out of sequence"));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(header.offset != 0)
            .truncate(header.offset == 0)
            .open(&part)?;
        file.write_all(&data)?;
        let position = header.offset + data.len() as u64;
        debug!(file = %name, offset = header.offset, position, "chunk stored");

        if position >= header.total_size {
            drop(file);
            self.finalize(&header, name, &part)?;
        }
        let ack = ChunkAckPayload {
            code: CODE_OK,
            position,
            file_id: None,
        };
        Ok(request.reply(MessageType::UploadChunkAck, Some(&ack))?)
    }

    fn handle_query(&self, request: &Message) -> std::io::Result<Message> {
        let Ok(Some(query)) = request.parse_payload::<FileRecordQuery>() else {
            return Ok(request.reply_error(CODE_BAD_REQUEST, "malformed query"));
        };
        let reply = match self.records.lock().unwrap().get(&query.code) {
            Some(record) => FileRecordPayload {
                code: CODE_OK,
                record: Some(record.clone()),
            },
            None => FileRecordPayload {
                code: CODE_NOT_FOUND,
                record: None,
            },
        };
        Ok(request.reply(MessageType::FileRecord, Some(&reply))?)
    }

    fn finalize(&self, header: &ChunkHeader, name: &str, part: &Path) -> std::io::Result<()> {
        let target = self.root.join(name);
        std::fs::rename(part, &target)?;
        let contents = std::fs::read(&target)?;
        let record = FileRecord {
            id: format!("local-{}", header.transfer_code.chars().take(12).collect::<String>()),
            name: name.to_string(),
            size: contents.len() as u64,
            checksum: Some(checksum_bytes(&contents)),
            average_rate: None,
            last_modified: Some(header.last_modified),
        };
        info!(file = %name, id = %record.id, size = record.size, "file stored");
        self.records
            .lock()
            .unwrap()
            .insert(header.transfer_code.clone(), record);
        Ok(())
    }

    /// True if another transfer already stored a file under `name`.
    fn name_taken(&self, name: &str, code: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .iter()
            .any(|(c, r)| r.name == name && c != code)
    }
}

/// Returns the name if it is a single normal path component.
fn plain_file_name(name: &str) -> Option<&str> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(name),
        _ => None,
    }
}

/// Transfer codes name part files, so only ASCII alphanumerics pass.
fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && code.len() <= 128 && code.bytes().all(|b| b.is_ascii_alphanumeric())
}

impl UploadTransport for LocalStore {
    fn send_chunk(
        &self,
        header: &ChunkHeader,
        data: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<Message, UploadError>> + Send + '_>> {
        let request = UploadChunkRequest {
            header: header.clone(),
            data: data.to_vec(),
        };
        self.dispatch(Message::new(
            self.next_message_id(),
            MessageType::UploadChunk,
            Some(&request),
        ))
    }

    fn send_request(
        &self,
        msg_type: MessageType,
        payload: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<Message, UploadError>> + Send + '_>> {
        self.dispatch(Message::new(self.next_message_id(), msg_type, Some(payload)))
    }
}
