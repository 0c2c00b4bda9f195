//! Compilation Pipeline - Single Entry Point
//!
//! Every batch goes through `compile_batch`: fatal checks first, then
//! per-record compilation, grouping, estimation and advisory validation,
//! then either a preview (dry run) or a submission to the print sink.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::compiler::compile;
pub use crate::compiler::LabelInstance;
use crate::config::EngineConfig;
use crate::context::{ContextRecord, SystemInfo};
use crate::estimator::{estimate, job_advisories, template_multiplier, Complexity};
use crate::grouping::{
    merge_tallies, plan_jobs, Group, GroupBy, GroupTallies, GroupTally, Grouper, PrintJob,
};
use crate::hashing::batch_hash;
use crate::print::{PrinterAssignment, PrinterProfile};
use crate::records::{
    estimate_label_count, item_label_count, LabelCount, LabelCountOverrides, SourceRecord,
    VendorProfile,
};
use crate::rules::Rule;
use crate::store::{
    Artifact, PrintBatch, PrintSink, RecordSource, StoreError, TemplateStore, TemplateSummary,
};
use crate::templates::{TemplateError, TemplateVariant};
use crate::validation::{ValidationOptions, Validator};
use crate::ENGINE_VERSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Batch has no records")]
    EmptyBatch,

    #[error("Invalid template: {0}")]
    InvalidTemplate(#[from] TemplateError),

    #[error("Template version {0} requires engine >= {1}, current is {2}")]
    EngineVersionMismatch(String, String, String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOptions {
    #[serde(flatten)]
    pub validation: ValidationOptions,
    #[serde(default)]
    pub include_shipping_label: Option<bool>,
    #[serde(default)]
    pub labels_per_product: Option<u32>,
    #[serde(default)]
    pub custom_label_counts: HashMap<String, u32>,
    #[serde(default)]
    pub batch_number: Option<String>,
    #[serde(default)]
    pub operator_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub record_ids: Vec<String>,
    pub template_id: String,
    #[serde(default)]
    pub group_by: GroupBy,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default)]
    pub options: CompileOptions,
}

fn default_dry_run() -> bool { true }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Collecting,
    Grouping,
    Previewed,
    Submitted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_labels: u32,
    pub groups: Vec<Group>,
    pub printer_jobs: Vec<PrintJob>,
    /// Seconds, rounded up
    pub estimated_time: u64,
    pub estimated_cost: f64,
    pub complexity: Complexity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_id: String,
    pub batch_hash: String,
    pub state: BatchState,
    pub dry_run: bool,
    pub template_id: String,
    pub template_version: String,
    pub engine_version: String,
    pub created_at: DateTime<Utc>,
    pub summary: BatchSummary,
    pub warnings: Vec<String>,
    /// Print sink job id, set once submitted
    pub batch_job_id: Option<String>,
    pub labels: Vec<LabelInstance>,
}

/// Output of compiling one record
struct RecordOutput {
    tally: GroupTally,
    labels: Vec<LabelInstance>,
}

/// Read-only inputs shared by every record of a batch
struct BatchInputs<'a> {
    template: &'a TemplateVariant,
    rules: &'a [Rule],
    vendor: &'a VendorProfile,
    system: &'a SystemInfo,
    overrides: &'a LabelCountOverrides,
    grouper: &'a Grouper,
}

impl BatchInputs<'_> {
    fn compile_record(&self, record: &SourceRecord) -> RecordOutput {
        let key = self.grouper.key_for(record);
        let mut labels = vec![];
        let mut total = 0u32;

        for item in &record.items {
            let copies = item_label_count(item, self.overrides);
            if copies == 0 {
                continue;
            }
            let ctx = ContextRecord::for_item(record, Some(item), self.vendor, self.system);
            labels.push(LabelInstance {
                record_id: record.id.clone(),
                product_id: Some(item.product_id.clone()),
                group_key: key.key.clone(),
                copies,
                label: compile(self.template, &ctx, self.rules),
            });
            total = total.saturating_add(copies);
        }

        if self.overrides.include_shipping_label {
            let ctx = ContextRecord::for_item(record, None, self.vendor, self.system);
            labels.push(LabelInstance {
                record_id: record.id.clone(),
                product_id: None,
                group_key: key.key.clone(),
                copies: 1,
                label: compile(self.template, &ctx, self.rules),
            });
            total = total.saturating_add(1);
        }

        RecordOutput {
            tally: GroupTally::single(key, &record.id, total),
            labels,
        }
    }
}

/// The compilation pipeline - single entry point for batch label operations
pub struct CompilationPipeline {
    templates: Arc<dyn TemplateStore>,
    records: Arc<dyn RecordSource>,
    sink: Arc<dyn PrintSink>,
    config: EngineConfig,
    pool: Option<rayon::ThreadPool>,
}

impl CompilationPipeline {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        records: Arc<dyn RecordSource>,
        sink: Arc<dyn PrintSink>,
        config: EngineConfig,
    ) -> Self {
        let pool = config.worker_threads.and_then(|n| {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .thread_name(|i| format!("labelforge-{}", i))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    tracing::warn!(error = %e, "worker pool unavailable, using the global pool");
                    None
                }
            }
        });
        Self {
            templates,
            records,
            sink,
            config,
            pool,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// List all available templates
    pub async fn list_templates(&self) -> Result<Vec<TemplateSummary>, PipelineError> {
        Ok(self.templates.list().await?)
    }

    /// Fetch a template and run the fatal structural checks on it
    pub async fn load_template(&self, id: &str) -> Result<TemplateVariant, PipelineError> {
        let template = self
            .templates
            .template(id)
            .await?
            .ok_or_else(|| PipelineError::TemplateNotFound(id.to_string()))?;
        template.check_structure()?;
        check_engine_version(&template)?;
        Ok(template)
    }

    /// Label counts per record, without compiling anything
    pub async fn label_counts(
        &self,
        record_ids: &[String],
        options: &CompileOptions,
    ) -> Result<Vec<(String, LabelCount)>, PipelineError> {
        let records = self.fetch_records(record_ids).await?;
        let overrides = self.overrides(options);
        Ok(records
            .iter()
            .map(|r| (r.id.clone(), estimate_label_count(r, &overrides)))
            .collect())
    }

    /// Compile a batch. Dry runs stop at the preview; otherwise the batch is
    /// handed to the print sink.
    pub async fn compile_batch(
        &self,
        request: &CompileRequest,
    ) -> Result<BatchResult, PipelineError> {
        let batch_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("batch", id = %batch_id, template = %request.template_id);
        self.run_batch(request, batch_id).instrument(span).await
    }

    async fn run_batch(
        &self,
        request: &CompileRequest,
        batch_id: String,
    ) -> Result<BatchResult, PipelineError> {
        tracing::info!(
            state = ?BatchState::Collecting,
            records = request.record_ids.len(),
            dry_run = request.dry_run,
            "batch started"
        );

        // Fatal checks, before any per-record work
        let template = self.load_template(&request.template_id).await.map_err(|e| {
            tracing::error!(error = %e, "batch rejected");
            e
        })?;
        let records = self.fetch_records(&request.record_ids).await.map_err(|e| {
            tracing::error!(error = %e, "batch rejected");
            e
        })?;

        let rules = self.templates.rules().await?;
        let printer_names = self.templates.printer_names().await?;
        let vendor = self.records.vendor().await?;
        let system = SystemInfo::at(
            Utc::now(),
            request.options.batch_number.clone(),
            request.options.operator_name.clone(),
        );
        let overrides = self.overrides(&request.options);
        let grouper = Grouper::new(
            request.group_by,
            template.default_printer.clone(),
            self.config.default_printer.clone(),
        )
        .with_printer_names(printer_names);

        tracing::info!(
            state = ?BatchState::Grouping,
            records = records.len(),
            rules = rules.len(),
            "compiling records"
        );
        let inputs = BatchInputs {
            template: &template,
            rules: &rules,
            vendor: &vendor,
            system: &system,
            overrides: &overrides,
            grouper: &grouper,
        };
        let (outputs, tallies) = self.run(|| {
            let outputs: Vec<RecordOutput> =
                records.par_iter().map(|r| inputs.compile_record(r)).collect();
            let tallies = outputs
                .par_iter()
                .map(|o| GroupTallies::from([(o.tally.key.clone(), o.tally.clone())]))
                .reduce(GroupTallies::new, merge_tallies);
            (outputs, tallies)
        });

        let by_id: HashMap<&str, &SourceRecord> =
            records.iter().map(|r| (r.id.as_str(), r)).collect();
        let assigned: Vec<(GroupTally, PrinterAssignment)> = tallies
            .into_values()
            .map(|tally| {
                let assignment = match (request.group_by, tally.record_ids.first()) {
                    (GroupBy::Printer, Some(first)) => match by_id.get(first.as_str()) {
                        Some(record) => grouper.printer_for(record),
                        None => grouper.batch_printer(),
                    },
                    _ => grouper.batch_printer(),
                };
                (tally, assignment)
            })
            .collect();
        let profiles = self
            .printer_profiles(assigned.iter().map(|(_, a)| a.printer_id.clone()).collect())
            .await?;

        // Job time uses the printer's stated throughput when it has one
        let (_, multiplier) = template_multiplier(&template);
        let groups: Vec<Group> = assigned
            .into_iter()
            .map(|(tally, assignment)| {
                let per_label = profiles
                    .get(&assignment.printer_id)
                    .and_then(Option::as_ref)
                    .and_then(PrinterProfile::seconds_per_label)
                    .unwrap_or(self.config.base_time_per_label);
                plan_jobs(
                    tally,
                    &assignment,
                    self.config.max_labels_per_job,
                    per_label * multiplier,
                )
            })
            .collect();
        let printer_jobs: Vec<PrintJob> =
            groups.iter().flat_map(|g| g.jobs.iter().cloned()).collect();
        let total_labels = groups.iter().fold(0u32, |acc, g| acc.saturating_add(g.label_count));
        tracing::info!(
            groups = groups.len(),
            jobs = printer_jobs.len(),
            total_labels,
            "batch grouped"
        );

        let est = estimate(total_labels, &template, &self.config);
        let mut warnings = Warnings::default();
        est.warnings.iter().for_each(|w| warnings.push(w.clone()));

        for job in &printer_jobs {
            let minutes = job.estimated_seconds as f64 / 60.0;
            if minutes > self.config.max_job_minutes {
                warnings.push(format!(
                    "Print job for group '{}' on {} is estimated at {:.1} min, over the {} min limit",
                    job.group_key, job.printer_id, minutes, self.config.max_job_minutes
                ));
            }
        }
        job_advisories(&printer_jobs).into_iter().for_each(|w| warnings.push(w));
        let silent = records
            .iter()
            .filter(|r| r.items.is_empty() && !overrides.include_shipping_label);
        for record in silent {
            warnings.push(format!("Record {} has no line items and produces no labels", record.id));
        }

        let labels: Vec<LabelInstance> = outputs.into_iter().flat_map(|o| o.labels).collect();
        self.preflight(&labels, &profiles, &request.options.validation, &mut warnings);

        let warnings = if request.options.validation.include_warnings {
            warnings.into_vec()
        } else {
            vec![]
        };

        let summary = BatchSummary {
            total_labels,
            groups,
            printer_jobs,
            estimated_time: est.time_seconds,
            estimated_cost: est.cost,
            complexity: est.complexity,
        };

        let record_ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let mut result = BatchResult {
            batch_id: batch_id.clone(),
            batch_hash: batch_hash(
                &template.id,
                &template.template_version,
                &record_ids,
                ENGINE_VERSION,
            ),
            state: BatchState::Previewed,
            dry_run: request.dry_run,
            template_id: template.id.clone(),
            template_version: template.template_version.clone(),
            engine_version: ENGINE_VERSION.to_string(),
            created_at: Utc::now(),
            summary,
            warnings,
            batch_job_id: None,
            labels,
        };

        if request.dry_run {
            tracing::info!(
                state = ?BatchState::Previewed,
                labels = total_labels,
                "dry run complete"
            );
            return Ok(result);
        }

        let job_id = self
            .sink
            .submit(PrintBatch {
                batch_id,
                template_id: template.id.clone(),
                groups: result.summary.groups.clone(),
                labels: result.labels.clone(),
                printers: profiles.into_values().flatten().collect(),
            })
            .await?;
        result.state = BatchState::Submitted;
        result.batch_job_id = Some(job_id);
        tracing::info!(
            state = ?BatchState::Submitted,
            job = ?result.batch_job_id,
            labels = total_labels,
            "batch submitted"
        );
        Ok(result)
    }

    /// Rendered artifacts for a submitted job
    pub async fn download(&self, job_id: &str) -> Result<Vec<Artifact>, PipelineError> {
        Ok(self.sink.artifacts(job_id).await?)
    }

    fn run<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    fn overrides(&self, options: &CompileOptions) -> LabelCountOverrides {
        let mut overrides = self.config.label_overrides();
        if let Some(include) = options.include_shipping_label {
            overrides.include_shipping_label = include;
        }
        if let Some(n) = options.labels_per_product {
            overrides.labels_per_product = n;
        }
        overrides.custom_label_counts = options.custom_label_counts.clone();
        overrides
    }

    /// Records for `ids` in request order; duplicates collapse to the first
    async fn fetch_records(&self, ids: &[String]) -> Result<Vec<SourceRecord>, PipelineError> {
        if ids.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }
        let mut seen = HashSet::new();
        let unique: Vec<String> =
            ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect();

        let mut found: HashMap<String, SourceRecord> = self
            .records
            .fetch(&unique)
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        unique
            .iter()
            .map(|id| found.remove(id).ok_or_else(|| PipelineError::RecordNotFound(id.clone())))
            .collect()
    }

    /// Profiles for the distinct printer ids; unknown ids map to `None`
    async fn printer_profiles(
        &self,
        ids: Vec<String>,
    ) -> Result<BTreeMap<String, Option<PrinterProfile>>, PipelineError> {
        let mut profiles = BTreeMap::new();
        for id in ids {
            if !profiles.contains_key(&id) {
                let profile = self.templates.printer(&id).await?;
                profiles.insert(id, profile);
            }
        }
        Ok(profiles)
    }

    /// Advisory validation of every distinct compiled label
    fn preflight(
        &self,
        labels: &[LabelInstance],
        profiles: &BTreeMap<String, Option<PrinterProfile>>,
        options: &ValidationOptions,
        warnings: &mut Warnings,
    ) {
        #[cfg(feature = "test-hooks")]
        VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let validator = Validator::for_options(options);

        // Media checks run against the first known printer, by id
        let mut printer: Option<&PrinterProfile> = None;
        if options.validate_media {
            for (id, profile) in profiles {
                match profile {
                    Some(profile) => {
                        printer.get_or_insert(profile);
                    }
                    None => warnings.push(format!(
                        "Printer profile '{}' not found; media checks skipped",
                        id
                    )),
                }
            }
        }

        let mut seen = HashSet::new();
        let distinct: Vec<&LabelInstance> = labels
            .iter()
            .filter(|l| seen.insert(l.label.fingerprint.as_str()))
            .collect();
        let found: Vec<String> = self.run(|| {
            distinct
                .par_iter()
                .map(|l| {
                    validator
                        .validate(&l.label.template, printer)
                        .violations
                        .iter()
                        .map(|v| v.to_warning())
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
                .into_iter()
                .flatten()
                .collect()
        });
        found.into_iter().for_each(|w| warnings.push(w));
    }
}

fn check_engine_version(template: &TemplateVariant) -> Result<(), PipelineError> {
    let engine_ver = semver::Version::parse(ENGINE_VERSION)
        .map_err(|_| TemplateError::InvalidVersion(ENGINE_VERSION.to_string()))?;
    let min_ver = semver::Version::parse(&template.engine_min_version)
        .map_err(|_| TemplateError::InvalidVersion(template.engine_min_version.clone()))?;

    if engine_ver < min_ver {
        return Err(PipelineError::EngineVersionMismatch(
            template.template_version.clone(),
            template.engine_min_version.clone(),
            ENGINE_VERSION.to_string(),
        ));
    }
    Ok(())
}

/// Warning list without duplicates, first occurrence wins
#[derive(Default)]
struct Warnings {
    seen: HashSet<String>,
    list: Vec<String>,
}

impl Warnings {
    fn push(&mut self, warning: String) {
        if self.seen.insert(warning.clone()) {
            self.list.push(warning);
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.list
    }
}
