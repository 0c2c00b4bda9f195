//! LabelForge Core - Label Compiler
//!
//! Templates plus business records in, print-ready labels out.
//!
//! # Guarantees
//! 1. Templates Are Contracts (structure is checked before any record work)
//! 2. Rules Are Ordered (descending priority, stable, last write wins)
//! 3. Binding Is Pure (no I/O, no clock, same inputs give the same label)
//! 4. Validation Is Advisory (warnings never block a batch)
//! 5. Grouping Is Order-Free (tallies merge the same in any order)
//! 6. Preview Before Print (dry runs never reach the print sink)

pub mod units;
pub mod path;
pub mod templates;
pub mod print;
pub mod records;
pub mod context;
pub mod binding;
pub mod rules;
pub mod compiler;
pub mod grouping;
pub mod estimator;
pub mod validation;
pub mod hashing;
pub mod config;
pub mod render;
pub mod store;
pub mod pipeline;

pub use templates::{
    Element, ElementKind, TemplateError, TemplateId, TemplateRegistry, TemplateVariant,
};
pub use units::{CanvasSize, UnitSpec};
pub use records::{LabelCount, LineItem, SourceRecord, VendorProfile};
pub use context::{ContextRecord, SystemInfo};
pub use rules::{Action, Condition, Operator, Rule};
pub use compiler::{compile, CompiledLabel};
pub use grouping::{Group, GroupBy, PrintJob};
pub use estimator::{Complexity, Estimate};
pub use validation::{
    ValidationReport, ValidationRule, ValidationViolation, Validator, ViolationSeverity,
};
pub use hashing::{batch_hash, canonical_json, sha256_hex};
pub use print::{PrintAuthority, PrinterProfile};
pub use config::EngineConfig;
pub use render::Renderer;
pub use store::{MemoryRecords, MemorySink, PrintSink, RecordSource, TemplateStore};
pub use pipeline::{BatchResult, BatchState, CompilationPipeline, CompileRequest, PipelineError};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
