//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use std::sync::Arc;

use labelforge_core::{
    binding::bind,
    compile,
    context::{ContextRecord, SystemInfo},
    estimator::{
        Complexity, COMPLEX_TEMPLATE_WARNING, LARGE_BATCH_WARNING, SINGLE_PRINTER_WARNING,
    },
    grouping::{merge_tallies, GroupBy, GroupKey, GroupTallies, GroupTally},
    path,
    pipeline::CompileOptions,
    print::OutputFormat,
    rules::applicable_rules,
    units::canvas_size,
    BatchState, CompilationPipeline, CompileRequest, EngineConfig, MemoryRecords, MemorySink,
    PipelineError, PrinterProfile, Rule, SourceRecord, TemplateError, TemplateRegistry,
    TemplateVariant, UnitSpec,
};
use base64::Engine as _;
use serde_json::json;

fn bread_template() -> TemplateVariant {
    serde_json::from_value(json!({
        "id": "bread-label",
        "name": "Bread Label",
        "units": { "widthIn": 2.0, "heightIn": 1.0, "dpi": 203 },
        "elements": [
            { "id": "title", "type": "text", "x": 5, "y": 5, "width": 90, "height": 40,
              "content": "{{product.title}}", "fontSize": 12 },
            { "id": "priority-badge", "type": "text", "x": 70, "y": 60, "width": 25, "height": 30,
              "content": "", "visible": false, "fontSize": 10 }
        ]
    }))
    .unwrap()
}

fn urgent_rule() -> Rule {
    serde_json::from_value(json!({
        "id": "high-priority-indicator",
        "name": "High Priority Orders",
        "category": "priority",
        "conditions": [ { "field": "order.priority", "operator": "equals", "value": "URGENT" } ],
        "actions": [ { "type": "show_element", "target": "priority-badge", "value": "URGENT" } ],
        "priority": 10
    }))
    .unwrap()
}

fn record(id: &str, extra: serde_json::Value) -> SourceRecord {
    let mut value = json!({
        "id": id,
        "items": [ { "productId": "p-1", "productName": "Sourdough Loaf", "quantity": 2 } ]
    });
    if let (Some(base), serde_json::Value::Object(extra)) = (value.as_object_mut(), extra) {
        base.extend(extra);
    }
    serde_json::from_value(value).unwrap()
}

fn request(template_id: &str, ids: &[&str], group_by: GroupBy, dry_run: bool) -> CompileRequest {
    CompileRequest {
        record_ids: ids.iter().map(|s| s.to_string()).collect(),
        template_id: template_id.to_string(),
        group_by,
        dry_run,
        options: CompileOptions::default(),
    }
}

fn create_pipeline(
    templates: Vec<TemplateVariant>,
    records: Vec<SourceRecord>,
) -> (CompilationPipeline, Arc<MemorySink>) {
    create_pipeline_with_printers(templates, vec![], records)
}

fn create_pipeline_with_printers(
    templates: Vec<TemplateVariant>,
    printers: Vec<PrinterProfile>,
    records: Vec<SourceRecord>,
) -> (CompilationPipeline, Arc<MemorySink>) {
    let mut registry = TemplateRegistry::new();
    templates.into_iter().for_each(|t| registry.register(t));
    printers.into_iter().for_each(|p| registry.register_printer(p));
    registry.register_rule(urgent_rule());
    let sink = Arc::new(MemorySink::default());
    let pipeline = CompilationPipeline::new(
        Arc::new(registry),
        Arc::new(MemoryRecords::new(records)),
        sink.clone(),
        EngineConfig::default(),
    );
    (pipeline, sink)
}

#[test]
fn invariant_doubling_dpi_doubles_canvas() {
    let at = |dpi| {
        canvas_size(&UnitSpec {
            width_in: 2.25,
            height_in: 1.25,
            dpi,
            bleed_in: None,
            safe_in: None,
        })
    };
    let base = at(203);
    let doubled = at(406);
    assert_eq!(at(203), base);
    assert_eq!(doubled.width_px, base.width_px * 2);
    assert_eq!(doubled.height_px, base.height_px * 2);
}

#[test]
fn invariant_path_resolver_misses_are_none() {
    let root = json!({ "order": { "id": "o-1", "note": null, "tags": "x" } });
    assert_eq!(path::resolve("order.id", &root), Some(&json!("o-1")));
    assert!(path::resolve("order.missing", &root).is_none());
    assert!(path::resolve("order.note", &root).is_none());
    assert!(path::resolve("order.tags.first", &root).is_none());
}

#[test]
fn invariant_placeholder_binding() {
    let ctx = ContextRecord::from_value(json!({ "product": { "title": "Sourdough Loaf" } }));
    let bound = bind(&bread_template(), &ctx);
    assert_eq!(bound.element("title").unwrap().content(), Some("Sourdough Loaf"));
}

#[test]
fn invariant_applicable_rules_stable_by_priority() {
    let rule = |id: &str, priority: i32| -> Rule {
        serde_json::from_value(json!({
            "id": id, "name": id, "priority": priority,
            "conditions": [ { "field": "order.id", "operator": "exists" } ]
        }))
        .unwrap()
    };
    let rules = vec![rule("a", 1), rule("b", 5), rule("c", 1), rule("d", 5)];
    let ctx = ContextRecord::from_value(json!({ "order": { "id": "o-1" } }));
    let order: Vec<&str> = applicable_rules(&rules, &ctx).iter().map(|r| r.id.as_str()).collect();
    assert_eq!(order, vec!["b", "d", "a", "c"]);
}

#[test]
fn invariant_no_matching_rule_equals_binding() {
    let ctx = ContextRecord::from_value(json!({
        "order": { "priority": "LOW" },
        "product": { "title": "Rye" }
    }));
    let template = bread_template();
    let compiled = compile(&template, &ctx, &[urgent_rule()]);
    assert_eq!(compiled.template, bind(&template, &ctx));
    assert!(compiled.applied_rules.is_empty());
}

#[test]
fn invariant_group_merge_order_independent() {
    let tally = |key: &str, id: &str, n: u32| -> GroupTallies {
        let t = GroupTally::single(GroupKey { key: key.into(), name: key.into() }, id, n);
        GroupTallies::from([(key.to_string(), t)])
    };
    let parts = vec![tally("a", "o-1", 2), tally("b", "o-2", 3), tally("a", "o-3", 4)];

    let forward = parts.iter().cloned().fold(GroupTallies::new(), merge_tallies);
    let backward = parts.iter().rev().cloned().fold(GroupTallies::new(), merge_tallies);
    assert_eq!(forward, backward);
    assert_eq!(forward["a"].label_count, 6);
    assert_eq!(forward["a"].record_ids, vec!["o-1".to_string(), "o-3".to_string()]);
}

#[test]
fn invariant_system_info_is_injected() {
    use chrono::TimeZone;
    let now = chrono::Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap();
    let a = SystemInfo::at(now, Some("B-7".into()), None);
    let b = SystemInfo::at(now, Some("B-7".into()), None);
    assert_eq!(a, b);
}

#[tokio::test]
async fn invariant_urgent_orders_show_badge() {
    let (pipeline, _) = create_pipeline(
        vec![bread_template()],
        vec![
            record("o-urgent", json!({ "priority": "URGENT" })),
            record("o-low", json!({ "priority": "LOW" })),
        ],
    );
    let result = pipeline
        .compile_batch(&request("bread-label", &["o-urgent", "o-low"], GroupBy::Printer, true))
        .await
        .unwrap();

    let label_for = |id: &str| {
        result
            .labels
            .iter()
            .find(|l| l.record_id == id)
            .map(|l| l.label.template.clone())
            .unwrap()
    };
    let urgent = label_for("o-urgent");
    let badge = urgent.element("priority-badge").unwrap();
    assert!(badge.visible);
    assert_eq!(badge.content(), Some("URGENT"));
    assert_eq!(urgent.element("title").unwrap().content(), Some("Sourdough Loaf"));

    let low = label_for("o-low");
    assert!(!low.element("priority-badge").unwrap().visible);
}

#[tokio::test]
async fn invariant_pickup_dates_split_jobs() {
    let dates = ["2026-10-17T09:00:00Z", "2026-10-18T09:00:00Z", "2026-10-19"];
    let records: Vec<SourceRecord> = (0..12)
        .map(|i| record(&format!("o-{:02}", i), json!({ "expectedDeliveryDate": dates[i % 3] })))
        .collect();
    let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let (pipeline, _) = create_pipeline(vec![bread_template()], records);

    let result = pipeline
        .compile_batch(&request("bread-label", &id_refs, GroupBy::PickupTime, true))
        .await
        .unwrap();

    assert_eq!(result.summary.groups.len(), 3);
    assert_eq!(result.summary.printer_jobs.len(), 3);
    assert_eq!(result.summary.total_labels, 24);
    assert!(result.summary.groups.iter().all(|g| g.record_ids.len() == 4));
    assert_eq!(result.summary.groups[0].name, "Pickup: 2026-10-17");
}

#[tokio::test]
async fn invariant_large_complex_batch_warns() {
    let mut elements: Vec<serde_json::Value> = (0..11)
        .map(|i| {
            json!({
                "id": format!("t{}", i), "type": "text", "x": 0, "y": i * 8,
                "width": 50, "height": 8, "content": "x", "fontSize": 8
            })
        })
        .collect();
    elements.push(json!({
        "id": "code", "type": "barcode", "x": 55, "y": 10, "width": 40, "height": 40,
        "value": "PJJ123C", "format": "CODE128"
    }));
    let template: TemplateVariant = serde_json::from_value(json!({
        "id": "busy", "name": "Busy",
        "units": { "widthIn": 4.0, "heightIn": 2.0, "dpi": 203 },
        "elements": elements
    }))
    .unwrap();

    let big = serde_json::from_value::<SourceRecord>(json!({
        "id": "o-big",
        "items": [ { "productId": "p-1", "productName": "Bagel", "quantity": 150 } ]
    }))
    .unwrap();
    let (pipeline, _) = create_pipeline(vec![template], vec![big]);

    let result = pipeline
        .compile_batch(&request("busy", &["o-big"], GroupBy::Printer, true))
        .await
        .unwrap();

    assert_eq!(result.summary.total_labels, 150);
    assert_eq!(result.summary.complexity, Complexity::Complex);
    assert_eq!(result.summary.estimated_time, 720);
    assert!((result.summary.estimated_cost - 18.0).abs() < 1e-9);
    assert_eq!(result.summary.printer_jobs.len(), 2);
    assert!(result.warnings.iter().any(|w| w == LARGE_BATCH_WARNING));
    assert!(result.warnings.iter().any(|w| w == COMPLEX_TEMPLATE_WARNING));
}

#[tokio::test]
async fn invariant_recompile_is_identical() {
    let (pipeline, _) = create_pipeline(
        vec![bread_template()],
        vec![record("o-1", json!({ "priority": "URGENT" })), record("o-2", json!({}))],
    );
    let a = pipeline
        .compile_batch(&request("bread-label", &["o-1", "o-2"], GroupBy::Printer, true))
        .await
        .unwrap();
    let b = pipeline
        .compile_batch(&request("bread-label", &["o-2", "o-1"], GroupBy::Printer, true))
        .await
        .unwrap();

    assert_ne!(a.batch_id, b.batch_id);
    assert_eq!(a.batch_hash, b.batch_hash);
    let fingerprints = |r: &labelforge_core::BatchResult| {
        let mut f: Vec<String> = r.labels.iter().map(|l| l.label.fingerprint.clone()).collect();
        f.sort();
        f
    };
    assert_eq!(fingerprints(&a), fingerprints(&b));
}

#[tokio::test]
async fn invariant_dry_run_never_submits() {
    let (pipeline, sink) = create_pipeline(vec![bread_template()], vec![record("o-1", json!({}))]);

    let preview = pipeline
        .compile_batch(&request("bread-label", &["o-1"], GroupBy::Printer, true))
        .await
        .unwrap();
    assert_eq!(preview.state, BatchState::Previewed);
    assert!(preview.batch_job_id.is_none());
    assert_eq!(sink.job_count().await, 0);

    let committed = pipeline
        .compile_batch(&request("bread-label", &["o-1"], GroupBy::Printer, false))
        .await
        .unwrap();
    assert_eq!(committed.state, BatchState::Submitted);
    assert_eq!(sink.job_count().await, 1);

    let job = committed.batch_job_id.unwrap();
    let artifacts = pipeline.download(&job).await.unwrap();
    assert_eq!(artifacts.len(), committed.summary.total_labels as usize);
    assert!(artifacts.iter().all(|a| a.format == OutputFormat::Png && a.hash.len() == 64));
}

#[tokio::test]
async fn invariant_committed_artifacts_match_label_count() {
    let bulk = serde_json::from_value::<SourceRecord>(json!({
        "id": "o-3",
        "items": [ { "productId": "p-1", "productName": "Rye", "quantity": 3 } ]
    }))
    .unwrap();
    let (pipeline, _) = create_pipeline(vec![bread_template()], vec![bulk]);

    let committed = pipeline
        .compile_batch(&request("bread-label", &["o-3"], GroupBy::Printer, false))
        .await
        .unwrap();
    assert_eq!(committed.summary.total_labels, 3);
    assert_eq!(committed.labels.len(), 1);
    assert_eq!(committed.labels[0].copies, 3);

    let artifacts = pipeline.download(&committed.batch_job_id.unwrap()).await.unwrap();
    assert_eq!(artifacts.len(), 3);
}

fn zebra(labels_per_minute: Option<f64>) -> PrinterProfile {
    let mut profile = PrinterProfile::placeholder("line-1");
    profile.name = "Zebra ZD421".into();
    profile.labels_per_minute = labels_per_minute;
    profile
}

#[tokio::test]
async fn invariant_thermal_printers_get_one_zpl_program_per_label() {
    let mut template = bread_template();
    template.default_printer = Some("line-1".into());
    let (pipeline, _) = create_pipeline_with_printers(
        vec![template],
        vec![zebra(None)],
        vec![record("o-1", json!({}))],
    );

    let committed = pipeline
        .compile_batch(&request("bread-label", &["o-1"], GroupBy::Printer, false))
        .await
        .unwrap();
    assert_eq!(committed.summary.printer_jobs[0].printer_id, "line-1");

    let artifacts = pipeline.download(&committed.batch_job_id.unwrap()).await.unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].format, OutputFormat::Zpl);
    let program = String::from_utf8(
        base64::engine::general_purpose::STANDARD
            .decode(&artifacts[0].data_base64)
            .unwrap(),
    )
    .unwrap();
    assert!(program.contains("^FDSourdough Loaf^FS"));
    assert!(program.contains("^PQ2\n^XZ"));
}

#[tokio::test]
async fn invariant_printer_throughput_sets_job_time() {
    let mut template = bread_template();
    template.default_printer = Some("line-1".into());
    let records = vec![record("o-1", json!({}))];

    let (fast, _) = create_pipeline_with_printers(
        vec![template.clone()],
        vec![zebra(Some(120.0))],
        records.clone(),
    );
    let (unrated, _) = create_pipeline_with_printers(vec![template], vec![zebra(None)], records);

    let req = request("bread-label", &["o-1"], GroupBy::Printer, true);
    let fast = fast.compile_batch(&req).await.unwrap();
    let unrated = unrated.compile_batch(&req).await.unwrap();

    // 2 labels at 120/min vs the 2 s/label default
    assert_eq!(fast.summary.printer_jobs[0].estimated_seconds, 1);
    assert_eq!(unrated.summary.printer_jobs[0].estimated_seconds, 4);
}

#[tokio::test]
async fn invariant_job_spread_advisories() {
    let ids: Vec<String> = (1..=6).map(|i| format!("o-{}", i)).collect();
    let records: Vec<SourceRecord> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| record(id, json!({ "expectedDeliveryDate": format!("2026-10-{}", 17 + i) })))
        .collect();
    let (pipeline, _) = create_pipeline(vec![bread_template()], records);

    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let result = pipeline
        .compile_batch(&request("bread-label", &id_refs, GroupBy::PickupTime, true))
        .await
        .unwrap();

    assert_eq!(result.summary.printer_jobs.len(), 6);
    assert!(result
        .warnings
        .iter()
        .any(|w| w == "6 print jobs have fewer than 5 labels (may be inefficient)"));
    assert!(result.warnings.iter().any(|w| w == SINGLE_PRINTER_WARNING));
}

#[tokio::test]
async fn invariant_fatal_errors_precede_record_work() {
    let mut bad_dpi = bread_template();
    bad_dpi.id = "bad-dpi".into();
    bad_dpi.units.dpi = 50;

    let mut duplicate = bread_template();
    duplicate.id = "duplicate".into();
    let first = duplicate.elements[0].clone();
    duplicate.elements.push(first);

    let mut oversized = bread_template();
    oversized.id = "oversized".into();
    oversized.elements[0].x = -50.0;
    oversized.elements[0].width = 5000.0;

    let mut too_new = bread_template();
    too_new.id = "too-new".into();
    too_new.engine_min_version = "99.0.0".into();

    let (pipeline, sink) = create_pipeline(
        vec![bread_template(), bad_dpi, duplicate, oversized, too_new],
        vec![record("o-1", json!({}))],
    );
    let run = |template: &'static str, ids: &'static [&'static str]| {
        let req = request(template, ids, GroupBy::Printer, false);
        let pipeline = &pipeline;
        async move { pipeline.compile_batch(&req).await }
    };

    assert!(matches!(run("missing", &["o-1"]).await, Err(PipelineError::TemplateNotFound(_))));
    assert!(matches!(run("bad-dpi", &["o-1"]).await, Err(PipelineError::InvalidTemplate(_))));
    assert!(matches!(run("duplicate", &["o-1"]).await, Err(PipelineError::InvalidTemplate(_))));
    assert!(matches!(
        run("oversized", &["o-1"]).await,
        Err(PipelineError::InvalidTemplate(TemplateError::InvalidGeometry(..)))
    ));
    assert!(matches!(
        run("too-new", &["o-1"]).await,
        Err(PipelineError::EngineVersionMismatch(..))
    ));
    assert!(matches!(
        run("bread-label", &["o-1", "o-404"]).await,
        Err(PipelineError::RecordNotFound(id)) if id == "o-404"
    ));
    assert!(matches!(run("bread-label", &[]).await, Err(PipelineError::EmptyBatch)));
    assert_eq!(sink.job_count().await, 0);
}

#[tokio::test]
async fn invariant_warnings_can_be_suppressed() {
    let big = serde_json::from_value::<SourceRecord>(json!({
        "id": "o-big",
        "items": [ { "productId": "p-1", "productName": "Bagel", "quantity": 150 } ]
    }))
    .unwrap();
    let (pipeline, _) = create_pipeline(vec![bread_template()], vec![big]);

    let mut req = request("bread-label", &["o-big"], GroupBy::Printer, true);
    let loud = pipeline.compile_batch(&req).await.unwrap();
    assert!(!loud.warnings.is_empty());

    req.options.validation.include_warnings = false;
    let quiet = pipeline.compile_batch(&req).await.unwrap();
    assert!(quiet.warnings.is_empty());
    assert_eq!(quiet.summary.total_labels, loud.summary.total_labels);
}

#[cfg(feature = "test-hooks")]
#[tokio::test]
async fn invariant_every_batch_runs_preflight() {
    use labelforge_core::pipeline::get_validation_call_count;

    let (pipeline, _) = create_pipeline(vec![bread_template()], vec![record("o-1", json!({}))]);
    let before = get_validation_call_count();
    pipeline
        .compile_batch(&request("bread-label", &["o-1"], GroupBy::Printer, true))
        .await
        .unwrap();
    pipeline
        .compile_batch(&request("bread-label", &["o-1"], GroupBy::Printer, false))
        .await
        .unwrap();
    assert!(get_validation_call_count() >= before + 2);
}
