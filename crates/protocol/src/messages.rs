use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Metadata sent alongside every chunk.
///
/// Transports that support binary frames send this as the frame header
/// and the raw bytes as the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    pub owner: String,
    pub domain: String,
    pub file_name: String,
    pub total_size: u64,
    /// Source last-modified time in epoch milliseconds.
    pub last_modified: i64,
    pub offset: u64,
    pub length: u64,
    pub transfer_code: String,
    /// SHA-256 hex of the chunk bytes (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// A chunk in a single JSON document.
///
/// The `data` field is base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkRequest {
    #[serde(flatten)]
    pub header: ChunkHeader,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Looks up the durable file record produced by a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecordQuery {
    /// The transfer code sent with every chunk of the transfer.
    pub code: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Server answer to a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAckPayload {
    pub code: i32,
    /// New cursor position; only meaningful when `code` is OK.
    #[serde(default)]
    pub position: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

/// Server answer to a [`FileRecordQuery`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecordPayload {
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<FileRecord>,
}

/// The authoritative record of a stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Average rate in bytes/second as measured by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_rate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> ChunkHeader {
        ChunkHeader {
            owner: "user-7".into(),
            domain: "files".into(),
            file_name: "report.pdf".into(),
            total_size: 256_000,
            last_modified: 1_700_000_000_000,
            offset: 102_400,
            length: 102_400,
            transfer_code: "c0ffee".into(),
            checksum: String::new(),
        }
    }

    #[test]
    fn chunk_header_uses_camel_case() {
        let json = serde_json::to_string(&sample_header()).unwrap();
        assert!(json.contains("\"fileName\":\"report.pdf\""));
        assert!(json.contains("\"totalSize\":256000"));
        assert!(json.contains("\"lastModified\":1700000000000"));
        assert!(json.contains("\"transferCode\""));
        assert!(!json.contains("checksum"));
    }

    #[test]
    fn upload_chunk_request_base64_body() {
        let req = UploadChunkRequest {
            header: sample_header(),
            data: vec![0x48, 0x65, 0x6c, 0x6c, 0x6f],
        };
        let json = serde_json::to_string(&req).unwrap();
        // "Hello" = "SGVsbG8="
        assert!(json.contains("SGVsbG8="));
        // Header fields are flattened next to the data.
        assert!(json.contains("\"offset\":102400"));
        let parsed: UploadChunkRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.data, b"Hello");
        assert_eq!(parsed.header, sample_header());
    }

    #[test]
    fn chunk_ack_reject_without_position() {
        let ack: ChunkAckPayload = serde_json::from_str(r#"{"code":403}"#).unwrap();
        assert_eq!(ack.code, 403);
        assert_eq!(ack.position, 0);
        assert!(ack.file_id.is_none());
    }

    #[test]
    fn file_record_payload_optional_fields() {
        let payload: FileRecordPayload = serde_json::from_str(
            r#"{"code":0,"record":{"id":"f-1","name":"a.bin","size":10,"averageRate":512}}"#,
        )
        .unwrap();
        let record = payload.record.unwrap();
        assert_eq!(record.id, "f-1");
        assert_eq!(record.average_rate, Some(512));
        assert!(record.checksum.is_none());

        let writing: FileRecordPayload = serde_json::from_str(r#"{"code":202}"#).unwrap();
        assert!(writing.record.is_none());
    }
}
