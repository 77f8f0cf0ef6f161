//! Manifest post-rendering
//!
//! Every document of a rendered manifest gets the release identity stamped
//! into `metadata.labels`. Transforms are serialized through one lock held by
//! the shared [`PostRenderer`] instance.

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::sync::{Mutex, PoisonError};

use crate::error::Result;

pub const RELEASE_LABEL: &str = "chartyard.io/release";
pub const NAMESPACE_LABEL: &str = "chartyard.io/namespace";

/// Shared manifest transformer; construct once and pass by reference
#[derive(Debug, Default)]
pub struct PostRenderer {
    lock: Mutex<()>,
}

impl PostRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp release labels onto every object in a multi-document manifest
    pub fn render(&self, manifest: &str, release: &str, namespace: &str) -> Result<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut out = Vec::new();
        for document in serde_yaml::Deserializer::from_str(manifest) {
            let mut value = Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            stamp(&mut value, release, namespace);
            out.push(serde_yaml::to_string(&value)?);
        }

        Ok(out
            .iter()
            .map(|doc| format!("---\n{}", doc))
            .collect::<Vec<_>>()
            .join(""))
    }
}

fn stamp(value: &mut Value, release: &str, namespace: &str) {
    let Some(object) = value.as_mapping_mut() else {
        return;
    };

    let metadata = object
        .entry(Value::from("metadata"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    let Some(metadata) = metadata.as_mapping_mut() else {
        return;
    };

    let labels = metadata
        .entry(Value::from("labels"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if labels.is_null() {
        *labels = Value::Mapping(Mapping::new());
    }
    if let Some(labels) = labels.as_mapping_mut() {
        labels.insert(Value::from(RELEASE_LABEL), Value::from(release));
        labels.insert(Value::from(NAMESPACE_LABEL), Value::from(namespace));
    }
}
