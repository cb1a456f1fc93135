//! Batch orchestration.
//!
//! Expands a run request into (indicator, entity) tasks and executes them on a
//! fixed pool of scoped worker threads:
//!
//! - Tasks are fed through a bounded queue of `batch_size` slots
//! - Workers report every dequeued task over a channel; this thread owns
//!   all counters
//! - A failed, skipped or panicking task never affects its neighbours
//! - Cancellation stops dequeuing; queued and unsent tasks count as cancelled
//! - The task timeout is checked between stages and always before the sink write

use crate::domain::definition::IndicatorDefinition;
use crate::domain::definition_store::DefinitionIndex;
use crate::domain::entity::{discover_universe, EntityTable, EntityType, EntityUniverse};
use crate::domain::error::EngineError;
use crate::domain::formula_eval::{Evaluator, DEFAULT_MAX_DEPTH};
use crate::domain::resolver;
use crate::domain::series::DateRange;
use crate::domain::task::{Failure, Stage, Task, TaskOutcome, TaskProgress, TaskReport, TaskState};
use crate::domain::value::Value;
use crate::ports::sink_port::{Cell, ResultSink, Row};
use crate::ports::source_port::TimeSeriesSource;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_BATCH_SIZE: usize = 64;
pub const DEFAULT_LOOKBACK_DAYS: u32 = 60;

/// Shared cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub workers: usize,
    pub batch_size: usize,
    pub dry_run: bool,
    pub max_depth: usize,
    pub lookback_days: u32,
    pub task_timeout: Option<Duration>,
    /// Key columns of every sink row.
    pub id_column: String,
    pub date_column: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
            max_depth: DEFAULT_MAX_DEPTH,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            task_timeout: None,
            id_column: crate::domain::definition::DEFAULT_ID_COLUMN.to_string(),
            date_column: crate::domain::definition::DEFAULT_DATE_COLUMN.to_string(),
        }
    }
}

pub fn default_workers() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Empty means every concrete entity type.
    pub entity_types: Vec<EntityType>,
    /// Empty means every loaded indicator.
    pub indicators: Vec<String>,
    /// Explicit entity ids; empty means discover them from the entity tables.
    pub entity_ids: Vec<String>,
    pub range: DateRange,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total_indicators: usize,
    pub total_entities: usize,
    pub total_tasks: usize,
    pub successful_calculations: usize,
    pub failed_calculations: usize,
    pub skipped_calculations: usize,
    pub cancelled_tasks: usize,
    /// Selected indicators that produced no tasks, with the reason.
    pub skipped_indicators: Vec<(String, String)>,
    pub failures: Vec<Failure>,
    pub elapsed: Duration,
    pub dry_run: bool,
}

impl RunSummary {
    fn record(&mut self, report: TaskReport) {
        match report.outcome {
            TaskOutcome::Succeeded { rows } => {
                tracing::debug!(
                    indicator = %report.indicator,
                    entity = %report.entity,
                    rows,
                    "task succeeded"
                );
                self.successful_calculations += 1;
            }
            TaskOutcome::Skipped { stage, reason } => {
                tracing::info!(
                    indicator = %report.indicator,
                    entity = %report.entity,
                    stage = %stage,
                    reason = %reason,
                    "task skipped"
                );
                self.skipped_calculations += 1;
            }
            TaskOutcome::Failed(failure) => {
                tracing::warn!(
                    indicator = %failure.indicator,
                    entity = %failure.entity,
                    stage = %failure.stage,
                    error = %failure.message,
                    "task failed"
                );
                self.failed_calculations += 1;
                self.failures.push(failure);
            }
            TaskOutcome::Cancelled => self.cancelled_tasks += 1,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run summary{}", if self.dry_run { " (dry run)" } else { "" })?;
        writeln!(f, "  indicators:  {}", self.total_indicators)?;
        writeln!(f, "  entities:    {}", self.total_entities)?;
        writeln!(f, "  tasks:       {}", self.total_tasks)?;
        writeln!(f, "  successful:  {}", self.successful_calculations)?;
        writeln!(f, "  failed:      {}", self.failed_calculations)?;
        writeln!(f, "  skipped:     {}", self.skipped_calculations)?;
        writeln!(f, "  cancelled:   {}", self.cancelled_tasks)?;
        write!(f, "  elapsed:     {:.3}s", self.elapsed.as_secs_f64())?;
        for (name, reason) in &self.skipped_indicators {
            write!(f, "\n  skipped indicator {name}: {reason}")?;
        }
        for failure in &self.failures {
            write!(f, "\n  failure: {failure}")?;
        }
        Ok(())
    }
}

pub struct Orchestrator<'a> {
    source: &'a dyn TimeSeriesSource,
    sink: &'a dyn ResultSink,
    definitions: Arc<DefinitionIndex>,
    entity_tables: BTreeMap<EntityType, EntityTable>,
    options: RunOptions,
    cancel: CancellationToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        source: &'a dyn TimeSeriesSource,
        sink: &'a dyn ResultSink,
        definitions: Arc<DefinitionIndex>,
    ) -> Self {
        Self {
            source,
            sink,
            definitions,
            entity_tables: BTreeMap::new(),
            options: RunOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_entity_tables(mut self, tables: BTreeMap<EntityType, EntityTable>) -> Self {
        self.entity_tables = tables;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Plan and execute a batch run.
    ///
    /// Fails before scheduling when nothing matches the request; per-task
    /// problems are reported in the summary instead.
    pub fn run(&self, request: &RunRequest) -> Result<RunSummary, EngineError> {
        let started = Instant::now();
        let mut summary = RunSummary {
            dry_run: self.options.dry_run,
            ..RunSummary::default()
        };

        let requested_types: Vec<EntityType> = if request.entity_types.is_empty() {
            EntityType::CONCRETE.to_vec()
        } else {
            expand_types(&request.entity_types)
        };

        let selected = self.select_definitions(request, &requested_types, &mut summary)?;
        summary.total_indicators = selected.len() + summary.skipped_indicators.len();

        let runnable = self.validated(selected, &mut summary);
        if runnable.is_empty() {
            return Err(EngineError::NoIndicatorsMatched);
        }

        let needed_types: Vec<EntityType> = requested_types
            .iter()
            .copied()
            .filter(|t| runnable.iter().any(|def| def.applies_to(*t)))
            .collect();
        let universe = discover_universe(
            self.source,
            &self.entity_tables,
            &needed_types,
            &request.entity_ids,
        )?;
        if universe.is_empty() {
            return Err(EngineError::NoEntities);
        }
        summary.total_entities = universe.total_distinct();

        let tasks = plan_tasks(&runnable, &needed_types, &universe, &mut summary);
        summary.total_tasks = tasks.len();

        tracing::info!(
            indicators = runnable.len(),
            entities = summary.total_entities,
            tasks = tasks.len(),
            range = %request.range,
            dry_run = self.options.dry_run,
            "starting batch run"
        );

        self.execute(tasks, request.range, &mut summary);

        summary.failures.sort();
        summary.elapsed = started.elapsed();
        tracing::info!(
            successful = summary.successful_calculations,
            failed = summary.failed_calculations,
            skipped = summary.skipped_calculations,
            cancelled = summary.cancelled_tasks,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "batch run finished"
        );
        Ok(summary)
    }

    fn select_definitions(
        &self,
        request: &RunRequest,
        requested_types: &[EntityType],
        summary: &mut RunSummary,
    ) -> Result<Vec<Arc<IndicatorDefinition>>, EngineError> {
        let candidates: Vec<Arc<IndicatorDefinition>> = if request.indicators.is_empty() {
            self.definitions.all()
        } else {
            let mut found = Vec::new();
            for name in &request.indicators {
                match self.definitions.get(name) {
                    Some(def) if !found.iter().any(|f: &Arc<IndicatorDefinition>| f.name == def.name) => {
                        found.push(def)
                    }
                    Some(_) => {}
                    None => tracing::warn!(indicator = %name, "requested indicator is not defined"),
                }
            }
            found
        };

        let mut selected = Vec::new();
        for def in candidates {
            if requested_types.iter().any(|t| def.applies_to(*t)) {
                selected.push(def);
            } else if !request.indicators.is_empty() {
                summary
                    .skipped_indicators
                    .push((def.name.clone(), "no applicable entity types requested".into()));
            }
        }

        if selected.is_empty() && summary.skipped_indicators.is_empty() {
            return Err(EngineError::NoIndicatorsMatched);
        }
        Ok(selected)
    }

    fn validated(
        &self,
        selected: Vec<Arc<IndicatorDefinition>>,
        summary: &mut RunSummary,
    ) -> Vec<Arc<IndicatorDefinition>> {
        selected
            .into_iter()
            .filter(|def| {
                let result = self.definitions.validate(&def.name, self.options.max_depth);
                if !result.valid {
                    let reason = result.errors.join("; ");
                    tracing::warn!(indicator = %def.name, errors = %reason, "definition failed validation");
                    summary.skipped_indicators.push((def.name.clone(), reason));
                }
                result.valid
            })
            .collect()
    }

    fn execute(&self, tasks: Vec<Task>, range: DateRange, summary: &mut RunSummary) {
        if tasks.is_empty() {
            return;
        }
        let workers = self.options.workers.clamp(1, tasks.len());
        let (task_tx, task_rx) = mpsc::sync_channel::<Task>(self.options.batch_size.max(1));
        let task_rx = Mutex::new(task_rx);
        let (report_tx, report_rx) = mpsc::channel::<TaskReport>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let report_tx = report_tx.clone();
                let task_rx = &task_rx;
                scope.spawn(move || self.worker_loop(task_rx, report_tx, range));
            }
            drop(report_tx);

            let total = tasks.len();
            for (sent, task) in tasks.into_iter().enumerate() {
                if self.cancel.is_cancelled() {
                    let unsent = total - sent;
                    tracing::info!(unsent, "run cancelled, not scheduling remaining tasks");
                    summary.cancelled_tasks += unsent;
                    break;
                }
                // Only fails once every worker is gone, which cannot happen
                // while this sender is alive.
                if task_tx.send(task).is_err() {
                    break;
                }
            }
            drop(task_tx);

            for report in report_rx {
                summary.record(report);
            }
        });
    }

    fn worker_loop(
        &self,
        tasks: &Mutex<mpsc::Receiver<Task>>,
        reports: mpsc::Sender<TaskReport>,
        range: DateRange,
    ) {
        loop {
            let next = {
                let rx = tasks.lock().unwrap_or_else(|e| e.into_inner());
                rx.recv()
            };
            let Ok(task) = next else {
                break;
            };

            let report = if self.cancel.is_cancelled() {
                TaskProgress::new(&task).finish(TaskOutcome::Cancelled)
            } else {
                panic::catch_unwind(AssertUnwindSafe(|| self.run_task(&task, range)))
                    .unwrap_or_else(|payload| {
                        let progress = TaskProgress::new(&task);
                        let failure = progress.failure(Stage::Worker, panic_message(&payload));
                        progress.finish(TaskOutcome::Failed(failure))
                    })
            };
            if reports.send(report).is_err() {
                break;
            }
        }
    }

    fn run_task(&self, task: &Task, range: DateRange) -> TaskReport {
        let deadline = self.options.task_timeout.map(|t| Instant::now() + t);
        let mut progress = TaskProgress::new(task);
        let outcome = self.drive(task, range, deadline, &mut progress);
        progress.finish(outcome)
    }

    fn drive(
        &self,
        task: &Task,
        range: DateRange,
        deadline: Option<Instant>,
        progress: &mut TaskProgress<'_>,
    ) -> TaskOutcome {
        let def = &task.definition;
        let max_depth = self.options.max_depth;

        let lookback = def.lookback_days.unwrap_or(self.options.lookback_days);
        let sources = self.definitions.required_sources(&def.name, max_depth);
        let frame = match resolver::resolve(
            self.source,
            &sources,
            &task.entity_id,
            range.extend_back(lookback),
        ) {
            Ok(frame) => frame,
            Err(e) => return TaskOutcome::Failed(progress.failure(Stage::Resolve, e.to_string())),
        };
        progress.advance(TaskState::DataResolved);

        let bounds = range.bounds_in(frame.index());
        if bounds.is_empty() {
            return TaskOutcome::Skipped {
                stage: Stage::Resolve,
                reason: format!("no data in {range}"),
            };
        }
        if let Some(failure) = timed_out(deadline, progress, Stage::Evaluate) {
            return TaskOutcome::Failed(failure);
        }

        let evaluator = Evaluator::new(&frame)
            .with_max_depth(max_depth)
            .with_indicators(self.definitions.as_ref());
        let value = match evaluator.evaluate_indicator(&def.name, &def.calculation) {
            Ok(value) => value,
            Err(e) if e.is_insufficient_data() => {
                return TaskOutcome::Skipped {
                    stage: Stage::Evaluate,
                    reason: e.to_string(),
                };
            }
            Err(e) => return TaskOutcome::Failed(progress.failure(Stage::Evaluate, e.to_string())),
        };
        progress.advance(TaskState::Evaluated);
        if let Some(failure) = timed_out(deadline, progress, Stage::PostProcess) {
            return TaskOutcome::Failed(failure);
        }

        let column = def.sink_column().unwrap_or(def.name.as_str());
        let mut columns = match output_columns(column, value, frame.len()) {
            Ok(columns) => columns,
            Err(e) => return TaskOutcome::Failed(progress.failure(Stage::Evaluate, e.to_string())),
        };
        for (_, values) in columns.iter_mut() {
            let trimmed = values[bounds.clone()].to_vec();
            *values = trimmed;
            if let Some(pp) = &def.post_processing {
                pp.apply(values);
            }
        }
        let dates = &frame.index()[bounds];
        progress.advance(TaskState::PostProcessed);

        if let Some(failure) = timed_out(deadline, progress, Stage::Sink) {
            return TaskOutcome::Failed(failure);
        }
        if self.options.dry_run {
            return TaskOutcome::Succeeded { rows: dates.len() };
        }

        let rows: Vec<Row> = dates
            .iter()
            .enumerate()
            .map(|(i, date)| {
                let mut row = Row::new();
                row.insert(self.options.id_column.clone(), Cell::Text(task.entity_id.clone()));
                row.insert(self.options.date_column.clone(), Cell::Date(*date));
                for (name, values) in &columns {
                    row.insert(name.clone(), Cell::number(values[i]));
                }
                row
            })
            .collect();
        let table = def.sink_table().unwrap_or(def.name.as_str());
        let keys = [self.options.id_column.as_str(), self.options.date_column.as_str()];
        match self.sink.upsert(table, &keys, &rows) {
            Ok(written) => {
                progress.advance(TaskState::Sunk);
                TaskOutcome::Succeeded { rows: written }
            }
            Err(e) => TaskOutcome::Failed(progress.failure(Stage::Sink, e.to_string())),
        }
    }
}

fn expand_types(types: &[EntityType]) -> Vec<EntityType> {
    let mut out = BTreeSet::new();
    for t in types {
        match t {
            EntityType::Common => out.extend(EntityType::CONCRETE),
            t => {
                out.insert(*t);
            }
        }
    }
    out.into_iter().collect()
}

/// One task per (definition, entity id); an id listed under several types
/// runs once, under the first applicable type.
fn plan_tasks(
    runnable: &[Arc<IndicatorDefinition>],
    types: &[EntityType],
    universe: &EntityUniverse,
    summary: &mut RunSummary,
) -> Vec<Task> {
    let mut tasks = Vec::new();
    for def in runnable {
        let mut seen = BTreeSet::new();
        for &entity_type in types.iter().filter(|t| def.applies_to(**t)) {
            for id in universe.get(entity_type) {
                if seen.insert(id.clone()) {
                    tasks.push(Task {
                        definition: Arc::clone(def),
                        entity_type,
                        entity_id: id.clone(),
                    });
                }
            }
        }
        if seen.is_empty() {
            summary
                .skipped_indicators
                .push((def.name.clone(), "no applicable entities".into()));
        }
    }
    tasks
}

/// Name each output column; bundles fan out to `<column>_<field>`.
fn output_columns(
    column: &str,
    value: Value,
    len: usize,
) -> Result<Vec<(String, Vec<f64>)>, crate::domain::error::EvalError> {
    match value {
        Value::Bundle(fields) => Ok(fields
            .into_iter()
            .map(|(field, values)| (format!("{column}_{field}"), values))
            .collect()),
        other => Ok(vec![(column.to_string(), other.into_series(len)?)]),
    }
}

fn timed_out(deadline: Option<Instant>, progress: &TaskProgress<'_>, next: Stage) -> Option<Failure> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => {
            Some(progress.failure(next, "task timed out"))
        }
        _ => None,
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::{SinkError, SourceError};
    use crate::ports::source_port::{RowSet, SourceQuery};
    use chrono::NaiveDate;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, d).unwrap()
    }

    /// 31 days of a rising close for every entity.
    struct RisingSource;

    impl TimeSeriesSource for RisingSource {
        fn fetch(&self, query: &SourceQuery) -> Result<RowSet, SourceError> {
            if query.entity_id == "boom" {
                panic!("corrupt page");
            }
            let dates: Vec<NaiveDate> = (1..=31).map(date).filter(|d| query.range.contains(*d)).collect();
            let close = dates.iter().enumerate().map(|(i, _)| 10.0 + i as f64).collect();
            let mut columns = BTreeMap::new();
            if query.columns.iter().any(|c| c == "close") {
                columns.insert("close".to_string(), close);
            }
            Ok(RowSet { dates, columns })
        }

        fn list_entities(&self, _table: &str, _id_column: &str) -> Result<Vec<String>, SourceError> {
            Ok(vec!["000001".into(), "600000".into()])
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        rows: Mutex<Vec<(String, Row)>>,
    }

    impl ResultSink for CollectingSink {
        fn upsert(&self, table: &str, _keys: &[&str], rows: &[Row]) -> Result<usize, SinkError> {
            let mut stored = self.rows.lock().unwrap();
            stored.extend(rows.iter().map(|r| (table.to_string(), r.clone())));
            Ok(rows.len())
        }
    }

    fn index(docs: &[&str]) -> Arc<DefinitionIndex> {
        Arc::new(DefinitionIndex::from_definitions(
            docs.iter().map(|d| IndicatorDefinition::from_json(d).unwrap()),
        ))
    }

    fn def(name: &str, calculation: &str) -> String {
        format!(
            r#"{{"name": "{name}", "entity_type": "stock",
                "data_sources": [{{"table": "stock_daily", "columns": ["close"]}}],
                "calculation": {calculation},
                "output": {{"table": "signals", "column": "{name}"}}}}"#
        )
    }

    fn request(ids: &[&str]) -> RunRequest {
        RunRequest {
            entity_types: vec![EntityType::Stock],
            indicators: vec![],
            entity_ids: ids.iter().map(|s| s.to_string()).collect(),
            range: DateRange::new(date(10), date(20)),
        }
    }

    fn options() -> RunOptions {
        RunOptions {
            workers: 2,
            batch_size: 1,
            lookback_days: 9,
            ..RunOptions::default()
        }
    }

    #[test]
    fn output_is_trimmed_to_the_requested_range() {
        let defs = index(&[&def("ma3", r#""sma(close, 3)""#)]);
        let sink = CollectingSink::default();
        let summary = Orchestrator::new(&RisingSource, &sink, defs)
            .with_options(options())
            .run(&request(&["000001"]))
            .unwrap();

        assert_eq!(summary.successful_calculations, 1);
        let rows = sink.rows.lock().unwrap();
        assert_eq!(rows.len(), 11);
        let (table, first) = &rows[0];
        assert_eq!(table, "signals");
        assert_eq!(first["trade_date"], Cell::Date(date(10)));
        assert_eq!(first["code"], Cell::Text("000001".into()));
        // close on day 10 is 19; sma over days 8..=10 is 18.
        assert_eq!(first["ma3"], Cell::Number(Some(18.0)));
    }

    #[test]
    fn bundle_fans_out_to_suffixed_columns() {
        let defs = index(&[&def("bb", r#""bollinger(close, 5)""#)]);
        let sink = CollectingSink::default();
        Orchestrator::new(&RisingSource, &sink, defs)
            .with_options(options())
            .run(&request(&["000001"]))
            .unwrap();
        let rows = sink.rows.lock().unwrap();
        let keys: Vec<&String> = rows[0].1.keys().collect();
        assert_eq!(keys, vec!["bb_lower", "bb_middle", "bb_upper", "code", "trade_date"]);
    }

    #[test]
    fn failures_are_isolated_per_task() {
        let defs = index(&[
            &def("good", r#""close > 15""#),
            &def("bad", r#"{"type": "function", "function": "sma", "args": ["close", 0]}"#),
        ]);
        let sink = CollectingSink::default();
        let summary = Orchestrator::new(&RisingSource, &sink, defs)
            .with_options(options())
            .run(&request(&["000001", "boom"]))
            .unwrap();

        assert_eq!(summary.total_tasks, 4);
        assert_eq!(summary.successful_calculations, 1);
        assert_eq!(summary.failed_calculations, 3);
        let worker_failures = summary.failures.iter().filter(|f| f.stage == Stage::Worker).count();
        assert_eq!(worker_failures, 2);
        assert!(summary
            .failures
            .iter()
            .any(|f| f.indicator == "bad" && f.entity == "000001" && f.stage == Stage::Evaluate));
    }

    #[test]
    fn insufficient_data_is_skipped() {
        let defs = index(&[&def("long", r#""sma(close, 100)""#)]);
        let summary = Orchestrator::new(&RisingSource, &CollectingSink::default(), defs)
            .with_options(options())
            .run(&request(&["000001"]))
            .unwrap();
        assert_eq!(summary.skipped_calculations, 1);
        assert_eq!(summary.failed_calculations, 0);
    }

    #[test]
    fn invalid_definitions_are_skipped_not_run() {
        let defs = index(&[
            &def("good", r#""close""#),
            &def("typo", r#""clsoe > 1""#),
        ]);
        let summary = Orchestrator::new(&RisingSource, &CollectingSink::default(), defs)
            .with_options(options())
            .run(&request(&["000001"]))
            .unwrap();
        assert_eq!(summary.total_indicators, 2);
        assert_eq!(summary.total_tasks, 1);
        assert_eq!(summary.skipped_indicators[0].0, "typo");
    }

    #[test]
    fn entities_discovered_from_tables() {
        let defs = index(&[&def("x", r#""close""#)]);
        let mut tables = BTreeMap::new();
        tables.insert(
            EntityType::Stock,
            EntityTable {
                table: "stock_daily".into(),
                id_column: "code".into(),
            },
        );
        let summary = Orchestrator::new(&RisingSource, &CollectingSink::default(), defs)
            .with_options(RunOptions {
                dry_run: true,
                ..options()
            })
            .with_entity_tables(tables)
            .run(&request(&[]))
            .unwrap();
        assert_eq!(summary.total_entities, 2);
        assert_eq!(summary.successful_calculations, 2);
    }

    #[test]
    fn nothing_to_do_is_fatal() {
        let defs = index(&[&def("x", r#""close""#)]);
        let mut req = request(&["000001"]);
        req.entity_types = vec![EntityType::Index];
        let err = Orchestrator::new(&RisingSource, &CollectingSink::default(), defs.clone())
            .run(&req)
            .unwrap_err();
        assert!(matches!(err, EngineError::NoIndicatorsMatched));

        let err = Orchestrator::new(&RisingSource, &CollectingSink::default(), defs)
            .run(&request(&[]))
            .unwrap_err();
        assert!(matches!(err, EngineError::NoEntities));
    }

    #[test]
    fn cancelled_before_start_runs_nothing() {
        let defs = index(&[&def("x", r#""close""#)]);
        let sink = CollectingSink::default();
        let orchestrator = Orchestrator::new(&RisingSource, &sink, defs).with_options(options());
        orchestrator.cancellation().cancel();
        let summary = orchestrator.run(&request(&["a", "b", "c"])).unwrap();
        assert_eq!(summary.total_tasks, 3);
        assert_eq!(summary.cancelled_tasks, 3);
        assert_eq!(summary.successful_calculations, 0);
        assert!(sink.rows.lock().unwrap().is_empty());
    }

    #[test]
    fn summary_display_lists_failures() {
        let mut summary = RunSummary::default();
        summary.record(TaskReport {
            indicator: "x".into(),
            entity: "000001".into(),
            state: TaskState::Evaluated,
            outcome: TaskOutcome::Failed(Failure {
                indicator: "x".into(),
                entity: "000001".into(),
                stage: Stage::Sink,
                message: "disk full".into(),
            }),
        });
        let text = summary.to_string();
        assert!(text.contains("failed:      1"));
        assert!(text.contains("x [000001] at sink: disk full"));
    }
}
