use pdx_classifier::config::PipelineConfig;
use pdx_classifier::evaluate::{self, EvaluationError};
use pdx_classifier::explore;
use pdx_classifier::pipeline::{self, PipelineError};
use pdx_classifier::prepare::AlignmentError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{TempDir, tempdir};

// Nine barcodes, eight of which map to annotated models. G1 rises with the
// model index so the Ras classifier separates M5..M8 from M1..M4 perfectly.
const EXPRESSION: &str = "\
gene\tbc1\tbc2\tbc3\tbc4\tbc5\tbc6\tbc7\tbc8\tbc9
G1\t1.0\t2.0\t3.0\t4.0\t5.0\t6.0\t7.0\t8.0\t4.5
G2\t8.0\t7.5\t6.0\t5.0\t4.0\t3.0\t2.5\t1.0\t5.0
G3\t2.0\t2.0\t3.0\t3.0\t1.0\t1.0\t4.0\t4.0\t2.5
G4\t0.1\t0.4\t0.2\t0.9\t0.3\t0.8\t0.5\t0.6\t0.7
G5\t3.2\t1.1\t2.4\t0.7\t1.9\t2.8\t0.2\t1.5\t1.0
G6\t5.0\t5.0\t5.0\t5.0\t5.0\t5.0\t5.0\t5.0\t5.0
";

const RAS_MODEL: &str = "\
feature\tweight
(Intercept)\t0.0
G1\t2.0
G3\t0.0
";

// GX is absent from the matrix: 3 of 4 features present, exactly the default minimum.
const TP53_MODEL: &str = "\
feature\tweight
intercept\t-0.25
G2\t1.5
G5\t0.5
G6\t0.3
GX\t0.2
";

const RAS_VARIANTS: &str = "\
Model\tHugo_Symbol\tVariant_Classification
M5\tKRAS\tMissense_Mutation
M6\tKRAS\tMissense_Mutation
M6\tNRAS\tMissense_Mutation
M7\tHRAS\tMissense_Mutation
M8\tNRAS\tMissense_Mutation
";

const TP53_VARIANTS: &str = "\
Model\tHugo_Symbol\tVariant_Classification
M1\tTP53\tMissense_Mutation
M2\tTP53\tNonsense_Mutation
M7\tTP53\tFrame_Shift_Del
";

const BARCODES: &str = "\
sample_id\tModel
bc1\tM1
bc2\tM2
bc3\tM3
bc4\tM4
bc5\tM5
bc6\tM6
bc7\tM7
bc8\tM8
";

const CLINICAL: &str = "\
Model\tHistology
M1\tNeuroblastoma
M2\tNeuroblastoma
M3\tOsteosarcoma
M4\tOsteosarcoma
M5\tNeuroblastoma
M6\tOther Sarcoma
M7\tOsteosarcoma
M8\tOther Solid Tumor
";

const CONFIG: &str = r#"
[input]
expression = "data/expression.tsv"
orientation = "genes-by-samples"
barcode_map = "data/barcodes.tsv"
clinical = "data/clinical.tsv"

[[classifiers]]
name = "ras"
label = "Ras"
model = "models/ras.tsv"
variants = "data/ras_variants.tsv"

[[classifiers]]
name = "tp53"
label = "TP53"
model = "models/tp53.tsv"
variants = "data/tp53_variants.tsv"
"#;

fn write_fixture(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("fixture parent")).expect("create fixture dir");
    fs::write(path, contents).expect("write fixture");
}

fn fixture_dir(config: &str) -> TempDir {
    let tmp = tempdir().expect("temporary directory");
    let root = tmp.path();
    write_fixture(root, "data/expression.tsv", EXPRESSION);
    write_fixture(root, "data/barcodes.tsv", BARCODES);
    write_fixture(root, "data/clinical.tsv", CLINICAL);
    write_fixture(root, "data/ras_variants.tsv", RAS_VARIANTS);
    write_fixture(root, "data/tp53_variants.tsv", TP53_VARIANTS);
    write_fixture(root, "models/ras.tsv", RAS_MODEL);
    write_fixture(root, "models/tp53.tsv", TP53_MODEL);
    write_fixture(root, "pipeline.toml", config);
    tmp
}

fn load_config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig::load(&dir.path().join("pipeline.toml")).expect("valid config")
}

fn run_all(config: &PipelineConfig) {
    pipeline::run_apply_stage(config).expect("apply stage");
    evaluate::run_evaluation_stage(config).expect("evaluation stage");
    explore::run_exploration_stage(config).expect("exploration stage");
}

fn snapshot(dirs: &[PathBuf]) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    for dir in dirs {
        for entry in fs::read_dir(dir).expect("read output dir") {
            let path = entry.expect("dir entry").path();
            let bytes = fs::read(&path).expect("read output file");
            files.insert(path, bytes);
        }
    }
    files
}

/// Parses a TSV into header-keyed rows.
fn read_rows(path: &Path) -> Vec<BTreeMap<String, String>> {
    let text = fs::read_to_string(path).expect("read table");
    let mut lines = text.lines();
    let header: Vec<&str> = lines.next().expect("header").split('\t').collect();
    lines
        .map(|line| {
            header
                .iter()
                .zip(line.split('\t'))
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect()
        })
        .collect()
}

#[test]
fn full_pipeline_writes_every_table_and_figure() {
    let dir = fixture_dir(CONFIG);
    let config = load_config(&dir);
    run_all(&config);

    let scores = fs::read_to_string(config.results_path(pipeline::SCORES_FILE)).unwrap();
    let mut lines = scores.lines();
    assert_eq!(
        lines.next().unwrap(),
        "sample_id\tras_score\tras_shuffle\ttp53_score\ttp53_shuffle"
    );
    assert_eq!(lines.count(), 9, "every expression sample is scored");

    for file in [
        pipeline::OVERLAP_FILE,
        "evaluation_metrics.tsv",
        "roc_curves.tsv",
        "pr_curves.tsv",
        "score_distributions.tsv",
        "labeled_scores.tsv",
        "outlier_samples.tsv",
        "variant_summary.tsv",
    ] {
        assert!(config.results_path(file).exists(), "{file} missing");
    }
    for figure in [
        "roc_curves.svg",
        "pr_curves.svg",
        "ras_predictions.svg",
        "tp53_predictions.svg",
        "ras_predictions_histology.svg",
        "tp53_predictions_histology.svg",
    ] {
        let svg = fs::read_to_string(config.figures_path(figure)).unwrap();
        assert!(svg.contains("<svg"), "{figure} is not an SVG document");
    }
}

#[test]
fn overlap_table_reports_missing_features() {
    let dir = fixture_dir(CONFIG);
    let config = load_config(&dir);
    pipeline::run_apply_stage(&config).unwrap();

    let rows = read_rows(&config.results_path(pipeline::OVERLAP_FILE));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["classifier"], "ras");
    assert_eq!(rows[0]["required"], "1", "zero weights are dropped");
    assert_eq!(rows[0]["found"], "1");
    assert_eq!(rows[1]["classifier"], "tp53");
    assert_eq!(rows[1]["required"], "4");
    assert_eq!(rows[1]["found"], "3");
    assert_eq!(rows[1]["missing"], "GX");
    assert_eq!(rows[1]["overlap"].parse::<f64>().unwrap(), 0.75);
}

#[test]
fn perfectly_separated_classifier_has_unit_auroc() {
    let dir = fixture_dir(CONFIG);
    let config = load_config(&dir);
    pipeline::run_apply_stage(&config).unwrap();
    let report = evaluate::run_evaluation_stage(&config).unwrap();
    assert_eq!(report.classifiers.len(), 2);

    let rows = read_rows(&config.results_path("evaluation_metrics.tsv"));
    let ras = rows
        .iter()
        .find(|r| r["classifier"] == "ras" && r["score_kind"] == "observed")
        .expect("observed ras row");
    assert_eq!(ras["n_mutant"], "4");
    assert_eq!(ras["n_wild_type"], "4", "the unmapped barcode is excluded");
    assert_eq!(ras["auroc"].parse::<f64>().unwrap(), 1.0);
    assert_eq!(ras["aupr"].parse::<f64>().unwrap(), 1.0);

    let shuffled = rows
        .iter()
        .find(|r| r["classifier"] == "ras" && r["score_kind"] == "shuffled")
        .expect("shuffled ras row");
    let auroc: f64 = shuffled["auroc"].parse().unwrap();
    assert!((0.0..=1.0).contains(&auroc));
}

#[test]
fn labeled_scores_drop_unmapped_samples_and_collapse_histology() {
    let dir = fixture_dir(CONFIG);
    let config = load_config(&dir);
    pipeline::run_apply_stage(&config).unwrap();
    evaluate::run_evaluation_stage(&config).unwrap();

    let rows = read_rows(&config.results_path("labeled_scores.tsv"));
    assert_eq!(rows.len(), 8);
    assert!(rows.iter().all(|r| r["sample_id"] != "bc9"));
    let bc6 = rows.iter().find(|r| r["sample_id"] == "bc6").unwrap();
    assert_eq!(bc6["Model"], "M6");
    assert_eq!(bc6["Histology"], "Other");
    assert_eq!(bc6["ras_status"], "1");
    assert_eq!(bc6["tp53_status"], "0");
    let bc3 = rows.iter().find(|r| r["sample_id"] == "bc3").unwrap();
    assert_eq!(bc3["ras_status"], "0");
}

#[test]
fn exploration_finds_no_ras_outliers_for_a_separating_classifier() {
    let dir = fixture_dir(CONFIG);
    let config = load_config(&dir);
    pipeline::run_apply_stage(&config).unwrap();
    let report = explore::run_exploration_stage(&config).unwrap();

    assert!(report.outliers.iter().all(|o| o.classifier != "ras"));
    let wild_type = report
        .variant_summary
        .iter()
        .find(|r| r.classifier == "ras" && r.gene == "wild-type")
        .expect("wild-type summary row");
    assert_eq!(wild_type.samples, 4);
    assert_eq!(wild_type.fraction_high, 0.0);
    let nras = report
        .variant_summary
        .iter()
        .find(|r| r.classifier == "ras" && r.gene == "NRAS")
        .unwrap();
    assert_eq!(nras.samples, 2);
}

#[test]
fn reruns_are_byte_identical() {
    let dir = fixture_dir(CONFIG);
    let config = load_config(&dir);
    let outputs = [
        config.output.results_dir.clone(),
        config.output.figures_dir.clone(),
    ];

    run_all(&config);
    let first = snapshot(&outputs);
    run_all(&config);
    let second = snapshot(&outputs);

    assert_eq!(
        first.keys().collect::<Vec<_>>(),
        second.keys().collect::<Vec<_>>()
    );
    for (path, bytes) in &first {
        assert!(bytes == &second[path], "{} differs between runs", path.display());
    }
}

#[test]
fn evaluation_is_idempotent_over_a_fixed_score_table() {
    let dir = fixture_dir(CONFIG);
    let config = load_config(&dir);
    pipeline::run_apply_stage(&config).unwrap();

    let first = evaluate::run_evaluation_stage(&config).unwrap();
    let metrics = fs::read(config.results_path("evaluation_metrics.tsv")).unwrap();
    let second = evaluate::run_evaluation_stage(&config).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        metrics,
        fs::read(config.results_path("evaluation_metrics.tsv")).unwrap()
    );
}

#[test]
fn a_different_shuffle_seed_changes_only_shuffled_scores() {
    let base = fixture_dir(CONFIG);
    let reseeded = fixture_dir(&format!("{CONFIG}\n[scoring]\nshuffle_seed = 99\n"));
    let a = pipeline::run_apply_stage(&load_config(&base)).unwrap();
    let b = pipeline::run_apply_stage(&load_config(&reseeded)).unwrap();

    for (x, y) in a.scores.classifiers.iter().zip(&b.scores.classifiers) {
        assert_eq!(x.observed, y.observed);
    }
    assert!(
        a.scores
            .classifiers
            .iter()
            .zip(&b.scores.classifiers)
            .any(|(x, y)| x.shuffled != y.shuffled)
    );
}

#[test]
fn fail_policy_rejects_missing_features_without_writing_scores() {
    let dir = fixture_dir(&format!("{CONFIG}\n[scoring]\nmissing_features = \"fail\"\n"));
    let config = load_config(&dir);
    match pipeline::run_apply_stage(&config) {
        Err(PipelineError::Alignment(AlignmentError::MissingFeatures {
            classifier, count, ..
        })) => {
            assert_eq!(classifier, "tp53");
            assert_eq!(count, 1);
        }
        other => panic!("Expected MissingFeatures, got {other:?}"),
    }
    assert!(!config.results_path(pipeline::SCORES_FILE).exists());
}

#[test]
fn insufficient_overlap_aborts_the_apply_stage() {
    let dir = fixture_dir(&format!("{CONFIG}\n[scoring]\nmin_feature_overlap = 0.8\n"));
    let config = load_config(&dir);
    assert!(matches!(
        pipeline::run_apply_stage(&config),
        Err(PipelineError::Alignment(AlignmentError::InsufficientOverlap { .. }))
    ));
}

#[test]
fn a_late_write_failure_leaves_no_evaluation_output() {
    let dir = fixture_dir(CONFIG);
    let config = load_config(&dir);
    pipeline::run_apply_stage(&config).expect("apply stage");
    // Figures are staged after every table; a file where the directory belongs
    // makes the first figure fail.
    fs::write(&config.output.figures_dir, "not a directory").expect("block figures dir");

    assert!(matches!(
        evaluate::run_evaluation_stage(&config),
        Err(EvaluationError::Output(_))
    ));
    let mut remaining: Vec<String> = fs::read_dir(&config.output.results_dir)
        .expect("read results dir")
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    remaining.sort();
    assert_eq!(
        remaining,
        vec![pipeline::SCORES_FILE.to_string(), pipeline::OVERLAP_FILE.to_string()]
    );
}

#[test]
fn a_failed_commit_rolls_back_the_apply_stage() {
    let dir = fixture_dir(CONFIG);
    let config = load_config(&dir);
    // A non-empty directory at the overlap table's path cannot be replaced.
    let overlap_path = config.results_path(pipeline::OVERLAP_FILE);
    fs::create_dir_all(overlap_path.join("occupied")).expect("block overlap table");

    match pipeline::run_apply_stage(&config) {
        Err(PipelineError::Output(e)) => assert_eq!(e.path, overlap_path),
        other => panic!("Expected an output error, got {other:?}"),
    }
    assert!(!config.results_path(pipeline::SCORES_FILE).exists());
}

#[test]
fn evaluation_without_scores_points_at_the_apply_stage() {
    let dir = fixture_dir(CONFIG);
    let config = load_config(&dir);
    match evaluate::run_evaluation_stage(&config) {
        Err(e @ EvaluationError::Scores(_)) => {
            assert!(e.to_string().contains("Run the apply stage first"));
        }
        other => panic!("Expected a score-table error, got {other:?}"),
    }
}

#[test]
fn cli_run_subcommand_executes_every_stage() {
    let dir = fixture_dir(CONFIG);
    let exe = env!("CARGO_BIN_EXE_pdx-classifier");
    let status = Command::new(exe)
        .args(["run", "--config"])
        .arg(dir.path().join("pipeline.toml"))
        .status()
        .expect("run pdx-classifier cli");

    assert!(status.success(), "CLI exited with status {status:?}");
    assert!(dir.path().join("results/variant_summary.tsv").exists());
    assert!(dir.path().join("figures/roc_curves.svg").exists());
}

#[test]
fn cli_exits_nonzero_on_an_invalid_config() {
    let dir = fixture_dir("classifiers = []\n\n[input]\nexpression = \"data/expression.tsv\"\n");
    let exe = env!("CARGO_BIN_EXE_pdx-classifier");
    let status = Command::new(exe)
        .args(["apply", "--config"])
        .arg(dir.path().join("pipeline.toml"))
        .status()
        .expect("run pdx-classifier cli");
    assert!(!status.success());
}
