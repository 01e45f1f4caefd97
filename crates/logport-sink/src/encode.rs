use std::io::{self, Write};

use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

/// A content hash of the encoded Parquet bytes, computed while they are
/// written rather than in a second pass over the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blake3Hash([u8; 32]);

impl Blake3Hash {
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

struct HashingBuffer {
    buffer: Vec<u8>,
    hasher: blake3::Hasher,
}

impl HashingBuffer {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            hasher: blake3::Hasher::new(),
        }
    }

    fn finish(self) -> (Vec<u8>, Blake3Hash) {
        let hash = self.hasher.finalize();
        (self.buffer, Blake3Hash(*hash.as_bytes()))
    }
}

impl Write for HashingBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_dictionary_enabled(true)
        .set_compression(Compression::ZSTD(ZstdLevel::try_new(2).unwrap_or_default()))
        .build()
}

pub struct EncodedParquet {
    pub bytes: Vec<u8>,
    pub hash: Blake3Hash,
    pub row_count: i64,
}

/// Encode a `RecordBatch` as Parquet bytes, hashing them with Blake3 in
/// the same pass.
pub fn encode_record_batch(batch: &RecordBatch) -> Result<EncodedParquet, parquet::errors::ParquetError> {
    let mut sink = HashingBuffer::new();
    let mut writer = ArrowWriter::try_new(&mut sink, batch.schema(), Some(writer_properties()))?;
    writer.write(batch)?;
    writer.close()?;

    let (bytes, hash) = sink.finish();
    Ok(EncodedParquet {
        bytes,
        hash,
        row_count: batch.num_rows() as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::entries_to_record_batch;
    use logport_core::{IncomingLogEntry, LogEntry};
    use std::collections::BTreeMap;

    #[test]
    fn encoding_is_deterministic_for_identical_batches() {
        let entry = LogEntry::from_incoming(IncomingLogEntry {
            app_id: "svc".into(),
            level: "INFO".into(),
            message: "hi".into(),
            source: "test".into(),
            timestamp: Some(chrono::Utc::now()),
            metadata: BTreeMap::new(),
            trace_id: None,
            user_id: None,
            environment: None,
        })
        .unwrap();

        let batch = entries_to_record_batch(&[entry]).unwrap();
        let a = encode_record_batch(&batch).unwrap();
        let b = encode_record_batch(&batch).unwrap();
        assert_eq!(a.hash, b.hash);
    }
}
