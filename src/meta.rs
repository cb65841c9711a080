use serde::Serialize;
use std::collections::BTreeMap;

/// Keys understood by the metadata bag. File-level bags carry the iTunes and
/// protection entries; per-track bags carry the format description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetaKey {
    Mime,
    TrackId,
    Width,
    Height,
    ChannelCount,
    SampleRate,
    Timescale,
    Duration,
    AvcConfig,
    EsdsConfig,
    NalLengthSize,
    // iTunes ilst
    Title,
    Artist,
    Album,
    Year,
    Writer,
    Genre,
    CoverArt,
    // content protection
    Pssh,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    Str(String),
    Int(i64),
    #[serde(serialize_with = "ser_blob")]
    Blob(Vec<u8>),
}

fn ser_blob<S: serde::Serializer>(b: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(b))
}

/// String/int/blob key-value store for format description.
///
/// Repeated queries return identical results; the bag is only written while
/// the owning box subtree is being parsed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetaData {
    entries: BTreeMap<MetaKey, MetaValue>,
}

impl MetaData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_str(&mut self, key: MetaKey, value: impl Into<String>) {
        self.entries.insert(key, MetaValue::Str(value.into()));
    }

    pub fn set_int(&mut self, key: MetaKey, value: i64) {
        self.entries.insert(key, MetaValue::Int(value));
    }

    pub fn set_blob(&mut self, key: MetaKey, value: Vec<u8>) {
        self.entries.insert(key, MetaValue::Blob(value));
    }

    pub fn str(&self, key: MetaKey) -> Option<&str> {
        match self.entries.get(&key) {
            Some(MetaValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, key: MetaKey) -> Option<i64> {
        match self.entries.get(&key) {
            Some(MetaValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn blob(&self, key: MetaKey) -> Option<&[u8]> {
        match self.entries.get(&key) {
            Some(MetaValue::Blob(b)) => Some(b),
            _ => None,
        }
    }

    pub fn contains(&self, key: MetaKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetaKey, &MetaValue)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let mut m = MetaData::new();
        m.set_str(MetaKey::Mime, "video/avc");
        m.set_int(MetaKey::Width, 1280);
        m.set_blob(MetaKey::AvcConfig, vec![1, 2, 3]);

        assert_eq!(m.str(MetaKey::Mime), Some("video/avc"));
        assert_eq!(m.int(MetaKey::Width), Some(1280));
        assert_eq!(m.blob(MetaKey::AvcConfig), Some(&[1u8, 2, 3][..]));
        // wrong-typed lookups miss instead of panicking
        assert_eq!(m.int(MetaKey::Mime), None);
        assert_eq!(m.str(MetaKey::Width), None);
    }

    #[test]
    fn queries_are_idempotent() {
        let mut m = MetaData::new();
        m.set_int(MetaKey::SampleRate, 44100);
        let a = m.int(MetaKey::SampleRate);
        let b = m.int(MetaKey::SampleRate);
        assert_eq!(a, b);
    }
}
