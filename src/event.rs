//! S3 object-created notifications.
//!
//! Only the fields the pipeline needs are modelled; everything else in the
//! notification is ignored by serde.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3EventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3Object {
    /// Form-encoded, as S3 delivers it.
    pub key: String,
}

/// A decoded bucket/key pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl S3Event {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PipelineError::invalid_event(format!("malformed S3 event: {e}")))
    }

    /// Builds a single-record event; keys are encoded the way S3 would.
    pub fn for_object(bucket: impl Into<String>, key: &str) -> Self {
        Self {
            records: vec![S3EventRecord {
                s3: S3Entity {
                    bucket: S3Bucket { name: bucket.into() },
                    object: S3Object {
                        key: encode_key(key),
                    },
                },
            }],
        }
    }

    pub fn first_location(&self) -> Result<ObjectLocation> {
        let record = self
            .records
            .first()
            .ok_or_else(|| PipelineError::invalid_event("event contains no records"))?;
        record.location()
    }
}

impl S3EventRecord {
    pub fn location(&self) -> Result<ObjectLocation> {
        let bucket = self.s3.bucket.name.clone();
        if bucket.is_empty() {
            return Err(PipelineError::invalid_event("record has an empty bucket name"));
        }
        let key = decode_key(&self.s3.object.key)?;
        if key.is_empty() {
            return Err(PipelineError::invalid_event("record has an empty object key"));
        }
        Ok(ObjectLocation { bucket, key })
    }
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    pub fn output_key(&self, prefix: &str) -> String {
        format!("{}/{}", prefix.trim_end_matches('/'), self.file_name())
    }
}

/// Decodes an S3 notification key: `+` is a space, then `%XX` escapes as UTF-8.
pub fn decode_key(raw: &str) -> Result<String> {
    let plus_decoded = raw.replace('+', " ");
    percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|e| PipelineError::invalid_event(format!("object key is not UTF-8: {e}")))
}

fn encode_key(key: &str) -> String {
    use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

    const KEY: &AsciiSet = &NON_ALPHANUMERIC
        .remove(b'/')
        .remove(b'-')
        .remove(b'_')
        .remove(b'.')
        .remove(b' ');
    utf8_percent_encode(key, KEY).to_string().replace(' ', "+")
}
