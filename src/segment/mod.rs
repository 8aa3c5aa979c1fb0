mod record;
#[allow(clippy::module_inception)]
mod segment;

pub use record::{
    decode_position, encode_position, encode_record, LogRecord, RecordKind, RecordPosition,
    MAX_HEADER_SIZE, NON_TXN_SEQ,
};
pub(crate) use record::{encode_key_with_seq, split_key_seq};
pub use segment::{segment_file_name, Segment};
pub use segment::{
    HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, SEGMENT_FILE_SUFFIX, SEQ_NO_FILE_NAME,
};
