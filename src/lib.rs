pub mod boxes;
pub mod error;
pub mod extractor;
pub mod fragment;
pub mod fragment_table;
pub mod meta;
pub mod moov;
pub mod parser;
pub mod random_access;
pub mod reader;
pub mod sample;
pub mod sample_table;
pub mod source;
pub mod track;

pub use boxes::{BoxHeader, FourCC};
pub use error::{DemuxError, Result};
pub use extractor::Mp4Extractor;
pub use meta::{MetaData, MetaKey, MetaValue};
pub use reader::{ReadSample, SampleData, SampleReader};
pub use sample::{EncryptionInfo, SampleLookup, SampleMeta, SubSampleRange};
pub use source::ByteSource;
