//! Collaborator seams - template store, record source, print sink
//!
//! The pipeline only talks to these traits. In-memory implementations back
//! the CLI and the tests.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::compiler::LabelInstance;
use crate::grouping::Group;
use crate::hashing::sha256_hex;
use crate::print::{OutputFormat, PrinterProfile};
use crate::records::{SourceRecord, VendorProfile};
use crate::render::{zpl, RenderError, Renderer};
use crate::rules::Rule;
use crate::templates::{TemplateRegistry, TemplateVariant};
use crate::units::{canvas_size, CanvasSize, UnitSpec};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data in {source_name}: {message}")]
    Invalid { source_name: String, message: String },

    #[error("Unknown print job: {0}")]
    UnknownJob(String),

    #[error("Render failed: {0}")]
    Render(#[from] RenderError),
}

/// Listing entry for a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub template_version: String,
    pub units: UnitSpec,
    pub element_count: usize,
}

impl From<&TemplateVariant> for TemplateSummary {
    fn from(t: &TemplateVariant) -> Self {
        Self {
            id: t.id.clone(),
            name: t.name.clone(),
            category: t.category.clone(),
            template_version: t.template_version.clone(),
            units: t.units.clone(),
            element_count: t.elements.len(),
        }
    }
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn template(&self, id: &str) -> Result<Option<TemplateVariant>, StoreError>;

    async fn printer(&self, id: &str) -> Result<Option<PrinterProfile>, StoreError>;

    async fn list(&self) -> Result<Vec<TemplateSummary>, StoreError>;

    /// Candidate rules, in authoring order
    async fn rules(&self) -> Result<Vec<Rule>, StoreError>;

    /// Display names of known printers keyed by id
    async fn printer_names(&self) -> Result<HashMap<String, String>, StoreError> {
        Ok(HashMap::new())
    }
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Records for `ids`; ids the source does not know are simply absent
    async fn fetch(&self, ids: &[String]) -> Result<Vec<SourceRecord>, StoreError>;

    async fn vendor(&self) -> Result<VendorProfile, StoreError> {
        Ok(VendorProfile::default())
    }
}

/// Everything a sink needs to print one committed batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintBatch {
    pub batch_id: String,
    pub template_id: String,
    pub groups: Vec<Group>,
    pub labels: Vec<LabelInstance>,
    /// Known profiles of the printers the jobs target
    #[serde(default)]
    pub printers: Vec<PrinterProfile>,
}

impl PrintBatch {
    /// Labels that will come off the printers, copies included
    pub fn printed_labels(&self) -> u32 {
        self.labels.iter().fold(0u32, |acc, l| acc.saturating_add(l.copies))
    }

    /// Profile of the printer a group's jobs go to, when known
    pub fn printer_for_group(&self, group_key: &str) -> Option<&PrinterProfile> {
        let group = self.groups.iter().find(|g| g.key == group_key)?;
        let printer_id = &group.jobs.first()?.printer_id;
        self.printers.iter().find(|p| &p.id == printer_id)
    }
}

/// One rendered output file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    pub filename: String,
    pub format: OutputFormat,
    pub size: [u32; 2],
    pub data_base64: String,
    pub hash: String,
}

#[async_trait]
pub trait PrintSink: Send + Sync {
    /// Accept a batch; returns the sink's job id
    async fn submit(&self, batch: PrintBatch) -> Result<String, StoreError>;

    async fn artifacts(&self, job_id: &str) -> Result<Vec<Artifact>, StoreError>;
}

#[async_trait]
impl TemplateStore for TemplateRegistry {
    async fn template(&self, id: &str) -> Result<Option<TemplateVariant>, StoreError> {
        Ok(self.get(id).cloned())
    }

    async fn printer(&self, id: &str) -> Result<Option<PrinterProfile>, StoreError> {
        Ok(TemplateRegistry::printer(self, id).cloned())
    }

    async fn list(&self) -> Result<Vec<TemplateSummary>, StoreError> {
        Ok(TemplateRegistry::list(self).into_iter().map(TemplateSummary::from).collect())
    }

    async fn rules(&self) -> Result<Vec<Rule>, StoreError> {
        Ok(TemplateRegistry::rules(self).to_vec())
    }

    async fn printer_names(&self) -> Result<HashMap<String, String>, StoreError> {
        Ok(self
            .printers()
            .into_iter()
            .map(|p| (p.id.clone(), p.name.clone()))
            .collect())
    }
}

/// Shape of a records file: a bare array, or records plus a vendor profile
#[derive(Deserialize)]
#[serde(untagged)]
enum RecordFile {
    Bare(Vec<SourceRecord>),
    WithVendor {
        #[serde(default)]
        vendor: VendorProfile,
        records: Vec<SourceRecord>,
    },
}

/// Record source over an in-memory set
#[derive(Debug, Clone, Default)]
pub struct MemoryRecords {
    records: HashMap<String, SourceRecord>,
    vendor: VendorProfile,
}

impl MemoryRecords {
    pub fn new(records: impl IntoIterator<Item = SourceRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
            vendor: VendorProfile::default(),
        }
    }

    pub fn with_vendor(mut self, vendor: VendorProfile) -> Self {
        self.vendor = vendor;
        self
    }

    pub fn load_from_file(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        let file: RecordFile = serde_json::from_str(&content).map_err(|e| StoreError::Invalid {
            source_name: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(match file {
            RecordFile::Bare(records) => Self::new(records),
            RecordFile::WithVendor { vendor, records } => Self::new(records).with_vendor(vendor),
        })
    }

    /// All record ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl RecordSource for MemoryRecords {
    async fn fetch(&self, ids: &[String]) -> Result<Vec<SourceRecord>, StoreError> {
        Ok(ids.iter().filter_map(|id| self.records.get(id).cloned()).collect())
    }

    async fn vendor(&self) -> Result<VendorProfile, StoreError> {
        Ok(self.vendor.clone())
    }
}

/// Print sink that keeps batches in memory and renders artifacts on
/// request: ZPL for printers that take it, otherwise one PNG per copy
#[derive(Default)]
pub struct MemorySink {
    renderer: Renderer,
    jobs: Mutex<HashMap<String, PrintBatch>>,
}

impl MemorySink {
    pub fn new(renderer: Renderer) -> Self {
        Self {
            renderer,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

#[async_trait]
impl PrintSink for MemorySink {
    async fn submit(&self, batch: PrintBatch) -> Result<String, StoreError> {
        let job_id = format!("job-{}", Uuid::new_v4());
        tracing::info!(
            job = %job_id,
            batch = %batch.batch_id,
            labels = batch.printed_labels(),
            "print batch accepted"
        );
        self.jobs.lock().await.insert(job_id.clone(), batch);
        Ok(job_id)
    }

    async fn artifacts(&self, job_id: &str) -> Result<Vec<Artifact>, StoreError> {
        let batch = self
            .jobs
            .lock()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownJob(job_id.to_string()))?;

        let mut out = vec![];
        for instance in &batch.labels {
            let template = &instance.label.template;
            match batch.printer_for_group(&instance.group_key) {
                Some(printer) if printer.output() == OutputFormat::Zpl => {
                    let program = zpl::label_zpl(template, printer.dpi, instance.copies);
                    let units = UnitSpec { dpi: printer.dpi, ..template.units.clone() };
                    let canvas = canvas_size(&units);
                    let seq = out.len() + 1;
                    let data = program.as_bytes();
                    out.push(artifact(&batch.batch_id, seq, OutputFormat::Zpl, canvas, data));
                }
                _ => {
                    let png = self.renderer.render_png(template)?;
                    let canvas = canvas_size(&template.units);
                    for _ in 0..instance.copies {
                        let seq = out.len() + 1;
                        out.push(artifact(&batch.batch_id, seq, OutputFormat::Png, canvas, &png));
                    }
                }
            }
        }
        Ok(out)
    }
}

fn artifact(
    batch_id: &str,
    seq: usize,
    format: OutputFormat,
    canvas: CanvasSize,
    data: &[u8],
) -> Artifact {
    let id = format!("{}-{:04}", batch_id, seq);
    Artifact {
        filename: format!("{}.{}", id, format.extension()),
        id,
        format,
        size: [canvas.width_px, canvas.height_px],
        hash: sha256_hex(data),
        data_base64: base64::engine::general_purpose::STANDARD.encode(data),
    }
}
