//! Integration tests for batch runs over mock ports.
//!
//! Tests cover:
//! - End-to-end dry and persisted runs of golden_cross and rsi_signals
//! - Per-task isolation of source and sink failures
//! - Missing columns degrading to missing values
//! - Date alignment across sources with different calendars (property)
//! - Crossover semantics against a brute-force reference (property)
//! - Cancellation, reload snapshots, nesting depth and post-processing order
//! - Deterministic output across worker counts

mod common;

use common::*;
use indicalc::domain::definition_store::DefinitionStore;
use indicalc::domain::entity::{EntityTable, EntityType};
use indicalc::domain::error::EvalError;
use indicalc::domain::formula::Formula;
use indicalc::domain::formula_eval::Evaluator;
use indicalc::domain::orchestrator::{Orchestrator, RunOptions, RunRequest};
use indicalc::domain::series::{DateRange, SeriesFrame};
use indicalc::domain::task::Stage;
use indicalc::domain::value::Value;
use indicalc::ports::sink_port::{Cell, Row};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn january() -> DateRange {
    DateRange::new(date(2023, 1, 1), date(2023, 1, 31))
}

fn stock_request(indicators: &[&str], entities: &[&str]) -> RunRequest {
    RunRequest {
        entity_types: vec![EntityType::Stock],
        indicators: indicators.iter().map(|s| s.to_string()).collect(),
        entity_ids: entities.iter().map(|s| s.to_string()).collect(),
        range: january(),
    }
}

fn options(workers: usize) -> RunOptions {
    RunOptions {
        workers,
        batch_size: 4,
        ..RunOptions::default()
    }
}

fn number(row: &Row, column: &str) -> Option<f64> {
    match row.get(column) {
        Some(Cell::Number(v)) => *v,
        other => panic!("expected number in {column}, got {other:?}"),
    }
}

mod end_to_end {
    use super::*;

    #[test]
    fn dry_run_of_two_stock_indicators() {
        let source = daily_source("000001");
        let sink = MockSink::new();
        let defs = index_of(&[GOLDEN_CROSS, RSI_SIGNALS]);

        let summary = Orchestrator::new(&source, &sink, defs)
            .with_options(RunOptions {
                dry_run: true,
                ..options(2)
            })
            .run(&stock_request(&["golden_cross", "rsi_signals"], &["000001"]))
            .unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.total_indicators, 2);
        assert_eq!(summary.total_entities, 1);
        assert_eq!(summary.total_tasks, 2);
        assert_eq!(summary.successful_calculations, 2);
        assert_eq!(summary.failed_calculations, 0);
        assert!(sink.rows.lock().unwrap().is_empty());
    }

    #[test]
    fn persisted_run_writes_one_row_per_date() {
        let source = daily_source("000001");
        let sink = MockSink::new();
        let defs = index_of(&[GOLDEN_CROSS, RSI_SIGNALS]);

        let summary = Orchestrator::new(&source, &sink, defs)
            .with_options(options(2))
            .run(&stock_request(&[], &["000001"]))
            .unwrap();
        assert_eq!(summary.successful_calculations, 2);

        let rows = sink.rows_for("stock_signals");
        let crosses: Vec<&Row> = rows.iter().filter(|r| r.contains_key("golden_cross")).collect();
        let oversold: Vec<&Row> = rows.iter().filter(|r| r.contains_key("rsi_oversold")).collect();
        assert_eq!(crosses.len(), 31);
        assert_eq!(oversold.len(), 31);

        for row in &crosses {
            assert_eq!(row["code"], Cell::Text("000001".into()));
            let v = number(row, "golden_cross").unwrap();
            assert!(v == 0.0 || v == 1.0);
        }
        assert_eq!(crosses[0]["trade_date"], Cell::Date(date(2023, 1, 1)));
        assert_eq!(crosses[30]["trade_date"], Cell::Date(date(2023, 1, 31)));
    }
}

mod isolation {
    use super::*;

    #[test]
    fn source_failure_for_one_entity_spares_the_rest() {
        let source = daily_source("000001").with_error("600000", "connection reset");
        let sink = MockSink::new();
        let defs = index_of(&[GOLDEN_CROSS]);

        let summary = Orchestrator::new(&source, &sink, defs)
            .with_options(options(3))
            .run(&stock_request(&[], &["000001", "600000"]))
            .unwrap();

        assert_eq!(summary.total_tasks, 2);
        assert_eq!(summary.successful_calculations, 1);
        assert_eq!(summary.failed_calculations, 1);
        let failure = &summary.failures[0];
        assert_eq!(failure.entity, "600000");
        assert_eq!(failure.stage, Stage::Resolve);
        assert!(failure.message.contains("connection reset"));
        assert_eq!(sink.rows_for("stock_signals").len(), 31);
    }

    #[test]
    fn sink_failure_is_recorded_per_task() {
        let other = r#"{
            "name": "close_copy",
            "entity_type": "stock",
            "data_sources": [{"table": "stock_daily", "columns": ["close"]}],
            "calculation": "close",
            "output": {"table": "stock_prices", "column": "close_copy"}
        }"#;
        let source = daily_source("000001");
        let sink = MockSink::failing_on("stock_signals");
        let defs = index_of(&[GOLDEN_CROSS, other]);

        let summary = Orchestrator::new(&source, &sink, defs)
            .with_options(options(2))
            .run(&stock_request(&[], &["000001"]))
            .unwrap();

        assert_eq!(summary.successful_calculations, 1);
        assert_eq!(summary.failed_calculations, 1);
        assert_eq!(summary.failures[0].indicator, "golden_cross");
        assert_eq!(summary.failures[0].stage, Stage::Sink);
        assert_eq!(sink.rows_for("stock_prices").len(), 31);
    }
}

mod degradation {
    use super::*;

    #[test]
    fn missing_column_reads_as_missing_values() {
        let def = r#"{
            "name": "turnover",
            "entity_type": "stock",
            "data_sources": [{"table": "stock_daily", "columns": ["close", "volume"]}],
            "calculation": "close * volume",
            "output": {"table": "stock_flow", "column": "turnover"}
        }"#;
        let source = daily_source("000001");
        let sink = MockSink::new();

        let summary = Orchestrator::new(&source, &sink, index_of(&[def]))
            .with_options(options(1))
            .run(&stock_request(&[], &["000001"]))
            .unwrap();

        assert_eq!(summary.successful_calculations, 1);
        let rows = sink.rows_for("stock_flow");
        assert_eq!(rows.len(), 31);
        assert!(rows.iter().all(|r| r["turnover"] == Cell::Number(None)));
    }

    #[test]
    fn conditions_over_missing_column_stay_missing() {
        let heavy = r#"{
            "name": "heavy_volume",
            "entity_type": "stock",
            "data_sources": [{"table": "stock_daily", "columns": ["volume"]}],
            "calculation": "volume > 0 and volume < 1000000000",
            "output": {"table": "stock_volume", "column": "heavy"}
        }"#;
        let surge = r#"{
            "name": "volume_surge",
            "entity_type": "stock",
            "data_sources": [{"table": "stock_daily", "columns": ["close", "volume"]}],
            "calculation": {
                "type": "crossover",
                "series1": "volume",
                "series2": {"type": "function", "function": "sma", "args": ["volume", 5]}
            },
            "output": {"table": "stock_volume", "column": "surge"}
        }"#;
        let source = daily_source("000001");
        let sink = MockSink::new();

        let summary = Orchestrator::new(&source, &sink, index_of(&[heavy, surge]))
            .with_options(options(1))
            .run(&stock_request(&[], &["000001"]))
            .unwrap();

        assert_eq!(summary.successful_calculations, 2);
        let rows = sink.rows_for("stock_volume");
        assert_eq!(rows.len(), 62);
        for row in &rows {
            let column = if row.contains_key("heavy") { "heavy" } else { "surge" };
            assert_eq!(row[column], Cell::Number(None), "{column}");
        }
    }

    #[test]
    fn entity_without_data_in_range_is_skipped() {
        let source = daily_source("000001");
        let summary = Orchestrator::new(&source, &MockSink::new(), index_of(&[GOLDEN_CROSS]))
            .with_options(options(1))
            .run(&stock_request(&[], &["999999"]))
            .unwrap();
        assert_eq!(summary.skipped_calculations, 1);
        assert_eq!(summary.failed_calculations, 0);
    }
}

mod alignment {
    use super::*;

    const SPREAD: &str = r#"{
        "name": "spread",
        "entity_type": "stock",
        "data_sources": [
            {"table": "stock_daily", "columns": ["close"]},
            {"table": "stock_flow", "columns": ["inflow"]}
        ],
        "calculation": "close - inflow",
        "output": {"table": "stock_spread", "column": "spread"}
    }"#;

    fn masked(column: &str, mask: &[bool], offset: f64) -> MockTable {
        let all = days(date(2023, 1, 1), mask.len());
        let dates: Vec<_> = all.iter().zip(mask).filter(|(_, keep)| **keep).map(|(d, _)| *d).collect();
        let values = (0..dates.len()).map(|i| offset + i as f64).collect();
        MockTable::new(dates).with_column(column, values)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn output_follows_the_union_of_source_dates(
            close_mask in prop::collection::vec(any::<bool>(), 31),
            flow_mask in prop::collection::vec(any::<bool>(), 31),
        ) {
            let source = MockSource::new()
                .with_table("stock_daily", "000001", masked("close", &close_mask, 100.0))
                .with_table("stock_flow", "000001", masked("inflow", &flow_mask, 0.0));
            let sink = MockSink::new();

            let summary = Orchestrator::new(&source, &sink, index_of(&[SPREAD]))
                .with_options(RunOptions { lookback_days: 0, ..options(1) })
                .run(&stock_request(&[], &["000001"]))
                .unwrap();

            let union: Vec<bool> = close_mask.iter().zip(&flow_mask).map(|(a, b)| *a || *b).collect();
            let expected_rows = union.iter().filter(|x| **x).count();
            if expected_rows == 0 {
                prop_assert_eq!(summary.skipped_calculations, 1);
                return Ok(());
            }
            prop_assert_eq!(summary.successful_calculations, 1);

            let rows = sink.rows_for("stock_spread");
            prop_assert_eq!(rows.len(), expected_rows);
            let all = days(date(2023, 1, 1), 31);
            let mut row_iter = rows.iter();
            for (i, present) in union.iter().enumerate() {
                if !*present {
                    continue;
                }
                let row = row_iter.next().unwrap();
                prop_assert_eq!(&row["trade_date"], &Cell::Date(all[i]));
                let both = close_mask[i] && flow_mask[i];
                prop_assert_eq!(number(row, "spread").is_some(), both);
            }
        }
    }
}

mod crossover {
    use super::*;

    fn evaluate(a: &[f64], b: &[f64]) -> Vec<f64> {
        let mut frame = SeriesFrame::new(days(date(2023, 1, 1), a.len()));
        frame.insert("a", a.to_vec());
        frame.insert("b", b.to_vec());
        let formula: Formula = serde_json::from_str(r#""crossover(a, b)""#).unwrap();
        match Evaluator::new(&frame).evaluate(&formula).unwrap() {
            Value::Series(values) => values,
            other => panic!("expected series, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn crossover_matches_reference(
            pairs in prop::collection::vec((-50i32..50, -50i32..50), 1..40)
        ) {
            let a: Vec<f64> = pairs.iter().map(|p| p.0 as f64).collect();
            let b: Vec<f64> = pairs.iter().map(|p| p.1 as f64).collect();
            let out = evaluate(&a, &b);

            prop_assert_eq!(out.len(), a.len());
            prop_assert_eq!(out[0], 0.0);
            for i in 1..a.len() {
                let expected = a[i - 1] < b[i - 1] && a[i] >= b[i];
                prop_assert_eq!(out[i] == 1.0, expected, "sample {}", i);
            }
        }
    }

    #[test]
    fn touching_from_below_counts_as_a_cross() {
        assert_eq!(evaluate(&[1.0, 2.0, 2.0], &[2.0, 2.0, 2.0]), vec![0.0, 1.0, 0.0]);
    }
}

mod control {
    use super::*;

    #[test]
    fn cancellation_before_run_leaves_the_sink_untouched() {
        let source = daily_source("000001");
        let sink = MockSink::new();
        let orchestrator = Orchestrator::new(&source, &sink, index_of(&[GOLDEN_CROSS, RSI_SIGNALS]))
            .with_options(options(2));
        orchestrator.cancellation().cancel();

        let summary = orchestrator.run(&stock_request(&[], &["000001"])).unwrap();
        assert_eq!(summary.cancelled_tasks, 2);
        assert_eq!(summary.successful_calculations, 0);
        assert_eq!(source.fetch_count(), 0);
        assert!(sink.rows.lock().unwrap().is_empty());
    }

    #[test]
    fn reload_swaps_definitions_without_touching_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        write_definitions(dir.path(), &[("stock", "golden_cross.json", GOLDEN_CROSS)]);
        let store = DefinitionStore::load(dir.path()).unwrap();
        let before = store.snapshot();
        assert!(store.get("rsi_signals").is_none());

        write_definitions(dir.path(), &[("stock", "rsi_signals.json", RSI_SIGNALS)]);
        assert_eq!(store.reload().unwrap(), 2);

        assert!(store.get("rsi_signals").is_some());
        assert_eq!(before.len(), 1);
        assert!(before.get("rsi_signals").is_none());
    }

    #[test]
    fn reload_failure_keeps_previous_index() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("defs");
        write_definitions(&root, &[("stock", "golden_cross.json", GOLDEN_CROSS)]);
        let store = DefinitionStore::load(&root).unwrap();

        std::fs::remove_dir_all(&root).unwrap();
        assert!(store.reload().is_err());
        assert!(store.get("golden_cross").is_some());
    }

    fn chain(len: usize) -> Vec<String> {
        let mut docs = vec![r#"{
            "name": "link0", "entity_type": "stock",
            "data_sources": [{"table": "stock_daily", "columns": ["close"]}],
            "calculation": "close",
            "output": {"table": "chain", "column": "link0"}
        }"#
        .to_string()];
        for i in 1..len {
            docs.push(format!(
                r#"{{"name": "link{i}", "entity_type": "stock",
                    "data_sources": [{{"table": "stock_daily", "columns": ["close"]}}],
                    "calculation": {{"type": "function", "function": "abs", "args": [{{"indicator": "link{prev}"}}]}},
                    "output": {{"table": "chain", "column": "link{i}"}}}}"#,
                prev = i - 1
            ));
        }
        docs
    }

    #[test]
    fn deep_indicator_chains_hit_the_depth_guard() {
        let docs = chain(40);
        let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
        let defs = index_of(&refs);
        let source = daily_source("000001");

        let summary = Orchestrator::new(&source, &MockSink::new(), defs.clone())
            .with_options(options(1))
            .run(&stock_request(&["link39"], &["000001"]))
            .unwrap();
        assert_eq!(summary.failed_calculations, 1);
        assert_eq!(summary.failures[0].stage, Stage::Evaluate);
        assert!(summary.failures[0].message.contains("maximum nesting depth"));

        let mut frame = SeriesFrame::new(days(date(2023, 1, 1), 3));
        frame.insert("close", vec![-1.0, 2.0, -3.0]);
        let deep = defs.get("link39").unwrap();
        let err = Evaluator::new(&frame)
            .with_indicators(defs.as_ref())
            .evaluate_indicator("link39", &deep.calculation)
            .unwrap_err();
        assert!(matches!(err, EvalError::FormulaTooDeep { limit: 32 }));

        let value = Evaluator::new(&frame)
            .with_max_depth(256)
            .with_indicators(defs.as_ref())
            .evaluate_indicator("link39", &deep.calculation)
            .unwrap();
        assert_eq!(value, Value::Series(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn post_processing_runs_fill_clip_then_round() {
        let def = r#"{
            "name": "capped",
            "entity_type": "stock",
            "data_sources": [{"table": "stock_daily", "columns": ["close"]}],
            "calculation": "close",
            "output": {"table": "capped", "column": "capped"},
            "post_processing": {"fill_na": 123.456, "clip": {"max": 100}, "round": 2}
        }"#;
        let dates = days(date(2023, 1, 1), 3);
        let source = MockSource::new().with_table(
            "stock_daily",
            "000001",
            MockTable::new(dates).with_column("close", vec![f64::NAN, 42.123_4, 250.0]),
        );
        let sink = MockSink::new();
        Orchestrator::new(&source, &sink, index_of(&[def]))
            .with_options(options(1))
            .run(&stock_request(&[], &["000001"]))
            .unwrap();

        let values: Vec<Option<f64>> = sink.rows_for("capped").iter().map(|r| number(r, "capped")).collect();
        assert_eq!(values, vec![Some(100.0), Some(42.12), Some(100.0)]);
    }
}

mod determinism {
    use super::*;

    fn run_with(workers: usize) -> Vec<(String, Row)> {
        let dates = days(date(2022, 10, 1), 123);
        let mut source = MockSource::new();
        for (n, entity) in ["000001", "000002", "600000", "600519"].iter().enumerate() {
            let close: Vec<f64> = wave(dates.len()).iter().map(|c| c + n as f64 * 3.5).collect();
            source = source.with_table(
                "stock_daily",
                entity,
                MockTable::new(dates.clone()).with_column("close", close),
            );
        }
        let mut tables = BTreeMap::new();
        tables.insert(
            EntityType::Stock,
            EntityTable {
                table: "stock_daily".into(),
                id_column: "code".into(),
            },
        );
        let sink = MockSink::new();
        let summary = Orchestrator::new(&source, &sink, index_of(&[GOLDEN_CROSS, RSI_SIGNALS]))
            .with_options(RunOptions {
                workers,
                batch_size: 1,
                ..RunOptions::default()
            })
            .with_entity_tables(tables)
            .run(&stock_request(&[], &[]))
            .unwrap_or_else(|e| panic!("run failed: {e}"));
        assert_eq!(summary.total_entities, 4);
        assert_eq!(summary.failed_calculations, 0);

        let mut rows = sink.rows.lock().unwrap().clone();
        rows.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
        rows
    }

    #[test]
    fn output_does_not_depend_on_worker_count() {
        assert_eq!(run_with(1), run_with(4));
    }
}
