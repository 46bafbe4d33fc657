// SimBus - Co-Simulation Runtime Core
// Copyright (C) 2026 SimBus Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! YAML document schemas consumed by the core: `Stack`, `Model`,
//! `SignalGroup`, `Network`, `Propagator`. Parsing only; the documents are
//! handed to `simbus-core`/`simbus-pdunet` for interpretation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub annotations: HashMap<String, serde_yaml::Value>,
    /// Matched against a `Stack` channel's `selectors.labels` (spec §6) to
    /// resolve which `SignalGroup`/`Network` document a channel binds to.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// A single YAML document, discriminated by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Document {
    Stack(StackDoc),
    Model(ModelDoc),
    SignalGroup(SignalGroupDoc),
    Network(NetworkDoc),
    Propagator(PropagatorDoc),
}

impl Document {
    pub fn metadata(&self) -> &Metadata {
        match self {
            Document::Stack(d) => &d.metadata,
            Document::Model(d) => &d.metadata,
            Document::SignalGroup(d) => &d.metadata,
            Document::Network(d) => &d.metadata,
            Document::Propagator(d) => &d.metadata,
        }
    }
}

// ---------------------------------------------------------------- Stack ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackDoc {
    #[serde(default)]
    pub metadata: Metadata,
    pub spec: StackSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSpec {
    #[serde(default)]
    pub models: Vec<StackModel>,
    #[serde(default)]
    pub connection: Connection,
    #[serde(default)]
    pub runtime: StackRuntime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackModel {
    pub name: String,
    #[serde(default)]
    pub uid: Option<u32>,
    pub model: StackModelRef,
    #[serde(default)]
    pub channels: Vec<ChannelSelector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackModelRef {
    pub name: String,
    #[serde(default)]
    pub mcl: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSelector {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub selectors: Selectors,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Selectors {
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Selectors {
    /// A selector with no labels matches nothing (spec §6: channels bind via
    /// `selectors.labels`); otherwise every listed label must be present
    /// with an equal value on the candidate document's `metadata.labels`.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        !self.labels.is_empty() && self.labels.iter().all(|(k, v)| metadata.labels.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Connection {
    #[serde(default)]
    pub transport: HashMap<String, TransportConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransportConfig {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub timeout: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StackRuntime {
    #[serde(default)]
    pub sequential: bool,
}

impl StackDoc {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(path.as_ref())
            .with_context(|| format!("opening Stack document {:?}", path.as_ref()))?;
        serde_yaml::from_reader(f).context("failed to parse Stack document")
    }
}

// ---------------------------------------------------------------- Model ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDoc {
    #[serde(default)]
    pub metadata: Metadata,
    pub spec: ModelSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(default)]
    pub channels: Vec<ModelChannel>,
    #[serde(default)]
    pub runtime: ModelRuntime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelChannel {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub selectors: Selectors,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelRuntime {
    #[serde(default)]
    pub dynlib: Vec<DynlibEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynlibEntry {
    pub os: String,
    pub arch: String,
    pub path: String,
}

impl ModelDoc {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(path.as_ref())
            .with_context(|| format!("opening Model document {:?}", path.as_ref()))?;
        serde_yaml::from_reader(f).context("failed to parse Model document")
    }
}

// --------------------------------------------------------- SignalGroup ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalGroupDoc {
    #[serde(default)]
    pub metadata: Metadata,
    pub spec: SignalGroupSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalGroupSpec {
    #[serde(default)]
    pub signals: Vec<SignalGroupSignal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalGroupSignal {
    pub signal: String,
    #[serde(default)]
    pub annotations: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorType {
    Scalar,
    Binary,
}

impl SignalGroupDoc {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(path.as_ref())
            .with_context(|| format!("opening SignalGroup document {:?}", path.as_ref()))?;
        serde_yaml::from_reader(f).context("failed to parse SignalGroup document")
    }

    /// `metadata.annotations.vector_type`, defaulting to `scalar`.
    pub fn vector_type(&self) -> VectorType {
        self.metadata
            .annotations
            .get("vector_type")
            .and_then(|v| v.as_str())
            .and_then(|s| match s {
                "binary" => Some(VectorType::Binary),
                "scalar" => Some(VectorType::Scalar),
                _ => None,
            })
            .unwrap_or(VectorType::Scalar)
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get("mime_type")
            .and_then(|v| v.as_str())
    }

    pub fn direct_index(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get("direct_index")
            .and_then(|v| v.as_str())
    }
}

// -------------------------------------------------------------- Network ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDoc {
    #[serde(default)]
    pub metadata: Metadata,
    pub spec: NetworkSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    #[serde(default)]
    pub pdus: Vec<serde_yaml::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub functions: NetworkFunctions,
    #[serde(default)]
    pub schedule: NetworkSchedule,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkFunctions {
    #[serde(default)]
    pub global: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkSchedule {
    #[serde(default)]
    pub step_size: Option<f64>,
    #[serde(default)]
    pub epoch_offset: Option<f64>,
}

impl NetworkDoc {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(path.as_ref())
            .with_context(|| format!("opening Network document {:?}", path.as_ref()))?;
        serde_yaml::from_reader(f).context("failed to parse Network document")
    }

    pub fn is_flexray(&self) -> bool {
        self.spec.metadata.contains_key("flexray")
    }
}

// ----------------------------------------------------------- Propagator ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagatorDoc {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: serde_yaml::Value,
}

// ------------------------------------------------------------- helpers ---

/// Parse every YAML document found in `path` (a single file may contain
/// multiple `---`-separated documents).
pub fn load_documents<P: AsRef<Path>>(path: P) -> Result<Vec<Document>> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("reading {:?}", path.as_ref()))?;
    let mut docs = Vec::new();
    for de in serde_yaml::Deserializer::from_str(&text) {
        let doc = Document::deserialize(de)
            .with_context(|| format!("parsing document in {:?}", path.as_ref()))?;
        docs.push(doc);
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stack_document() {
        let yaml = r#"
kind: Stack
metadata:
  name: example-stack
spec:
  models:
    - name: model_a
      uid: 42
      model:
        name: ModelA
      channels:
        - name: data_channel
  connection:
    transport:
      redis:
        uri: redis://localhost:6379
  runtime:
    sequential: true
"#;
        let doc: Document = serde_yaml::from_str(yaml).unwrap();
        match doc {
            Document::Stack(s) => {
                assert_eq!(s.metadata.name, "example-stack");
                assert_eq!(s.spec.models.len(), 1);
                assert_eq!(s.spec.models[0].uid, Some(42));
                assert!(s.spec.runtime.sequential);
                assert_eq!(
                    s.spec.connection.transport["redis"].uri.as_deref(),
                    Some("redis://localhost:6379")
                );
            }
            _ => panic!("expected Stack document"),
        }
    }

    #[test]
    fn selector_matches_requires_every_label() {
        let mut metadata = Metadata::default();
        metadata.labels.insert("bus".into(), "can0".into());
        metadata.labels.insert("node".into(), "ecu1".into());

        let mut selectors = Selectors::default();
        selectors.labels.insert("bus".into(), "can0".into());
        assert!(selectors.matches(&metadata));

        selectors.labels.insert("node".into(), "ecu2".into());
        assert!(!selectors.matches(&metadata));

        assert!(!Selectors::default().matches(&metadata));
    }

    #[test]
    fn signal_group_vector_type_defaults_to_scalar() {
        let yaml = r#"
kind: SignalGroup
metadata:
  name: binary_group
  annotations:
    vector_type: binary
    mime_type: application/x-automotive-bus
spec:
  signals:
    - signal: can_bus
"#;
        let doc: SignalGroupDoc = match serde_yaml::from_str::<Document>(yaml).unwrap() {
            Document::SignalGroup(g) => g,
            _ => panic!("expected SignalGroup"),
        };
        assert_eq!(doc.vector_type(), VectorType::Binary);
        assert_eq!(doc.mime_type(), Some("application/x-automotive-bus"));
    }

    #[test]
    fn multi_document_yaml_loads_all_kinds() {
        let yaml = r#"
kind: Stack
metadata:
  name: s
spec: {}
---
kind: Model
metadata:
  name: m
spec:
  channels:
    - name: data_channel
"#;
        let dir = std::env::temp_dir().join("simbus_config_test_multi.yaml");
        std::fs::write(&dir, yaml).unwrap();
        let docs = load_documents(&dir).unwrap();
        assert_eq!(docs.len(), 2);
        std::fs::remove_file(&dir).ok();
    }
}
