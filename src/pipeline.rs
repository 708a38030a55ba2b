//! Per-region runs and the parallel run over all regions.
//!
//! Each region goes through window selection, warm start, fitting, forward
//! integration and, when configured, bands. Regions share nothing mutable, so
//! a run maps them on a worker pool and reduces the outcomes once all of them
//! have finished. Regions that are skipped or fail are logged and left out of
//! every aggregate.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{Duration, NaiveDate};
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::aggregation::{hierarchy_without_bands, AggregationEngine, HierarchicalForecast};
use crate::backtest::{self, BacktestRow, BacktestTruth};
use crate::config::RunConfig;
use crate::error::{ForecastError, Result};
use crate::fitting::{FitOutcome, FittingEngine, ForecastObjective};
use crate::forecast::{today_offset, ForecastGenerator, ForecastRow, ForecastTables};
use crate::model::{Compartment, InitialConditions, ModelVariant, STATE_LEN};
use crate::parameters::{ParameterFitRow, PriorFit, WarmStart};
use crate::region::RegionKey;
use crate::series::{FittingWindow, ObservedSeries};
use crate::uncertainty::{BandEstimator, ReferenceForecast};

/// Days before a wave start at which the lagged case count is read.
pub const LAGGED_CASES_DAYS: i64 = 14;

/// Days before a wave start at which the lagged death count is read.
pub const LAGGED_DEATHS_DAYS: i64 = 9;

/// Everything one region's run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionTask {
    pub region: RegionKey,
    pub series: ObservedSeries,
    pub population: f64,

    /// Projected state from an earlier fit, used by new-wave runs.
    pub prior_state: Option<[f64; STATE_LEN]>,

    /// Start of the wave being fitted; selects the corrected model variant.
    pub wave_start: Option<NaiveDate>,
}

impl RegionTask {
    pub fn new(region: RegionKey, series: ObservedSeries, population: f64) -> Self {
        Self {
            region,
            series,
            population,
            prior_state: None,
            wave_start: None,
        }
    }

    pub fn with_wave(mut self, wave_start: NaiveDate, prior_state: Option<[f64; STATE_LEN]>) -> Self {
        self.wave_start = Some(wave_start);
        self.prior_state = prior_state;
        self
    }

    pub fn variant(&self) -> ModelVariant {
        if self.wave_start.is_some() {
            ModelVariant::InitialStateCorrection
        } else {
            ModelVariant::Base
        }
    }
}

/// A region that produced a usable fit.
#[derive(Debug, Clone)]
pub struct RegionResult {
    pub region: RegionKey,
    /// Day 0 of the fit
    pub anchor: NaiveDate,
    pub initial: InitialConditions,
    pub fit: FitOutcome,
    pub parameters: ParameterFitRow,
    pub tables: ForecastTables,
    /// Whether bands were attached to the tables
    pub banded: bool,
}

/// Outcome of one region's run.
#[derive(Debug)]
pub enum RegionOutcome {
    Fitted(Box<RegionResult>),
    Skipped { region: RegionKey, reason: ForecastError },
    Failed { region: RegionKey, error: ForecastError },
}

impl RegionOutcome {
    pub fn region(&self) -> &RegionKey {
        match self {
            RegionOutcome::Fitted(r) => &r.region,
            RegionOutcome::Skipped { region, .. } | RegionOutcome::Failed { region, .. } => region,
        }
    }

    pub fn fitted(&self) -> Option<&RegionResult> {
        match self {
            RegionOutcome::Fitted(r) => Some(r),
            _ => None,
        }
    }
}

/// Reduced output of a whole run.
#[derive(Debug, Default)]
pub struct RunOutput {
    pub results: Vec<RegionResult>,
    pub skipped: Vec<RegionKey>,
    pub failed: Vec<(RegionKey, String)>,
    pub parameters: Vec<ParameterFitRow>,
    /// Full-range tables with country, continent and world aggregates
    pub full: HierarchicalForecast,
    /// Forward-only tables, sums only
    pub since_today: HierarchicalForecast,
}

/// Seed of one region's annealing RNG.
fn region_seed(seed: u64, region: &RegionKey) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    region.hash(&mut hasher);
    hasher.finish()
}

/// Runs regions with one configuration.
#[derive(Debug, Clone)]
pub struct ForecastPipeline {
    config: RunConfig,
    engine: FittingEngine,
    generator: ForecastGenerator,
    bands: Option<(BandEstimator, ReferenceForecast)>,
}

impl ForecastPipeline {
    /// # Errors
    ///
    /// * `InvalidInput` if the configuration does not validate
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine: FittingEngine::new(&config),
            generator: ForecastGenerator::new(config.clinical),
            bands: None,
            config,
        })
    }

    /// Attach the reference forecast used for bands.
    ///
    /// Bands are only produced when the configuration enables them. The
    /// configured cutoff replaces the reference's own.
    pub fn with_reference(mut self, mut reference: ReferenceForecast) -> Result<Self> {
        if self.config.confidence.enabled {
            if let Some(cutoff) = self.config.confidence.reference_cutoff {
                reference.cutoff = cutoff;
            }
            self.bands = Some((BandEstimator::new(self.config.confidence.q)?, reference));
        }
        Ok(self)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn generator(&self) -> &ForecastGenerator {
        &self.generator
    }

    fn initial_conditions(&self, task: &RegionTask, window: &FittingWindow) -> InitialConditions {
        let (cases, deaths) = window.first();
        let clinical = &self.config.clinical;
        match task.wave_start {
            None => InitialConditions::from_observed(task.population, cases, deaths, clinical),
            Some(start) => {
                let lagged = |days: i64| task.series.first_on_or_after(start - Duration::days(days));
                let lagged_cases = lagged(LAGGED_CASES_DAYS).map_or(0.0, |o| o.cases);
                let lagged_deaths = lagged(LAGGED_DEATHS_DAYS).map_or(0.0, |o| o.deaths);
                let prior_recovered = task
                    .prior_state
                    .map(|x| x[Compartment::Recovered.index()]);
                InitialConditions::for_new_wave(
                    task.population,
                    cases,
                    deaths,
                    lagged_cases,
                    lagged_deaths,
                    prior_recovered,
                    clinical,
                )
            }
        }
    }

    fn try_region(&self, task: &RegionTask, prior: Option<&[PriorFit]>) -> Result<RegionResult> {
        let region = &task.region;
        if !(task.population > 0.0) {
            return Err(ForecastError::MissingPopulation(region.to_string()));
        }

        let window = task.series.fitting_window(
            region,
            self.config.case_threshold,
            task.wave_start,
            self.config.today,
            self.config.min_history,
        )?;
        let variant = task.variant();
        let initial = self.initial_conditions(task, &window);

        let warm = WarmStart::resolve(prior, region);
        if let WarmStart::PriorFit(row) = &warm {
            if row.data_start != window.anchor {
                warn!(
                    "{}: prior fit starts on {}, the series on {}; using the series date",
                    region, row.data_start, window.anchor
                );
            }
        }
        let (start, bounds) = warm.start_and_bounds(variant, self.engine.optimizer().family());

        let objective = ForecastObjective::new(
            &window,
            initial.clone(),
            self.config.clinical,
            variant,
            self.engine.uses_increments(),
        );
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(region_seed(seed, region)),
            None => StdRng::from_entropy(),
        };
        let fit = self.engine.fit(&objective, &start, &bounds, &mut rng)?;

        let grid_len = self.config.horizon.grid_len(window.anchor);
        let solution = self.generator.integrate(&initial, &fit.params, grid_len)?;
        let mut tables = self.generator.tables(
            region,
            window.anchor,
            self.config.today,
            &solution,
            Some(&task.series),
        );
        let banded = match &self.bands {
            Some((estimator, reference)) => estimator.annotate(
                region,
                &mut tables,
                today_offset(window.anchor, self.config.today),
                reference,
            ),
            None => false,
        };

        info!(
            "{}: fitted {} days from {} ({}), MAPE {:.3} %",
            region,
            window.len(),
            window.anchor,
            warm.label(),
            fit.mape
        );

        Ok(RegionResult {
            region: region.clone(),
            anchor: window.anchor,
            parameters: ParameterFitRow::new(region.clone(), window.anchor, fit.mape, &fit.params, variant),
            initial,
            fit,
            tables,
            banded,
        })
    }

    /// Run one region.
    pub fn run_region(&self, task: &RegionTask, prior: Option<&[PriorFit]>) -> RegionOutcome {
        match self.try_region(task, prior) {
            Ok(result) => RegionOutcome::Fitted(Box::new(result)),
            Err(e) if e.is_skip() => {
                warn!("skipping {}: {}", task.region, e);
                RegionOutcome::Skipped {
                    region: task.region.clone(),
                    reason: e,
                }
            }
            Err(e) => {
                error!("no result for {}: {}", task.region, e);
                RegionOutcome::Failed {
                    region: task.region.clone(),
                    error: e,
                }
            }
        }
    }

    /// Run every task on the worker pool, then reduce and aggregate.
    ///
    /// # Errors
    ///
    /// * `Other` if the worker pool cannot be built
    pub fn run(&self, tasks: &[RegionTask], prior: Option<&[PriorFit]>) -> Result<RunOutput> {
        let workers = self.config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| ForecastError::Other(format!("worker pool: {}", e)))?;
        info!("running {} regions on {} workers", tasks.len(), workers);

        let outcomes: Vec<RegionOutcome> =
            pool.install(|| tasks.par_iter().map(|t| self.run_region(t, prior)).collect());
        Ok(self.reduce(outcomes))
    }

    /// Collect fitted regions, log exclusions and build the aggregates.
    pub fn reduce(&self, mut outcomes: Vec<RegionOutcome>) -> RunOutput {
        outcomes.sort_by(|a, b| a.region().cmp(b.region()));

        let mut output = RunOutput::default();
        for outcome in outcomes {
            match outcome {
                RegionOutcome::Fitted(result) => output.results.push(*result),
                RegionOutcome::Skipped { region, reason } => {
                    info!("excluded {} from aggregation: {}", region, reason);
                    output.skipped.push(region);
                }
                RegionOutcome::Failed { region, error } => {
                    info!("excluded {} from aggregation: {}", region, error);
                    output.failed.push((region, error.to_string()));
                }
            }
        }

        let full: Vec<ForecastRow> = output
            .results
            .iter()
            .flat_map(|r| r.tables.full.iter().cloned())
            .collect();
        let since_today: Vec<ForecastRow> = output
            .results
            .iter()
            .flat_map(|r| r.tables.since_today.iter().cloned())
            .collect();

        let mut aggregation = AggregationEngine::new(self.config.today);
        if let Some((estimator, reference)) = &self.bands {
            aggregation = aggregation.with_bands(*estimator, reference.clone());
        }
        output.full = aggregation.hierarchy(&full);
        output.since_today = hierarchy_without_bands(&since_today);
        output.parameters = output.results.iter().map(|r| r.parameters.clone()).collect();

        info!(
            "run finished: {} fitted, {} skipped, {} failed",
            output.results.len(),
            output.skipped.len(),
            output.failed.len()
        );
        output
    }

    /// Two-stage wave run.
    ///
    /// The first stage fits the base model; each fitted region's state is
    /// projected to `wave_start` and the second stage fits the corrected
    /// variant from there. Regions without a first-stage fit start the second
    /// stage from the count heuristic.
    pub fn run_waves(
        &self,
        tasks: &[RegionTask],
        prior: Option<&[PriorFit]>,
        wave_start: NaiveDate,
    ) -> Result<RunOutput> {
        let first = self.run(tasks, prior)?;

        let wave_tasks: Vec<RegionTask> = tasks
            .iter()
            .map(|task| {
                let state = first
                    .results
                    .iter()
                    .find(|r| r.region == task.region)
                    .and_then(|r| {
                        self.generator
                            .project_state(&r.initial, &r.fit.params, r.anchor, wave_start)
                            .map_err(|e| warn!("{}: cannot project to {}: {}", r.region, wave_start, e))
                            .ok()
                    });
                task.clone().with_wave(wave_start, state)
            })
            .collect();

        self.run(&wave_tasks, prior)
    }

    /// Score one fitted region on its training window and on the
    /// `test_days` observed after `today`.
    ///
    /// The full table's truth columns supply both windows, so the task's
    /// series must extend past `today`.
    ///
    /// # Errors
    ///
    /// * `InvalidInput` if a day in either window has no observation, or
    ///   `test_days` is zero
    /// * `DimensionMismatch` if the horizon ends before the test window does
    pub fn backtest_region(&self, result: &RegionResult, test_days: usize) -> Result<BacktestRow> {
        let today = self.config.today;
        let test_end = today + Duration::days(test_days as i64);

        let mut truth = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
        let mut predicted = (Vec::new(), Vec::new());
        for row in result.tables.full.iter().take_while(|r| r.date <= test_end) {
            let (Some(cases), Some(deaths)) = (row.true_cases, row.true_deaths) else {
                return Err(ForecastError::InvalidInput(format!(
                    "{}: no observation on {} for the backtest",
                    result.region, row.date
                )));
            };
            if row.date <= today {
                truth.0.push(cases);
                truth.1.push(deaths);
            } else {
                truth.2.push(cases);
                truth.3.push(deaths);
            }
            predicted.0.push(row.total_detected);
            predicted.1.push(row.total_detected_deaths);
        }
        if test_days > 0 && truth.2.len() < test_days {
            return Err(ForecastError::DimensionMismatch(format!(
                "{}: forecast ends {} days into a {} day test window",
                result.region,
                truth.2.len(),
                test_days
            )));
        }

        BacktestRow::evaluate(
            &result.region,
            result.anchor,
            BacktestTruth {
                train_cases: &truth.0,
                train_deaths: &truth.1,
                test_cases: &truth.2,
                test_deaths: &truth.3,
            },
            &predicted.0,
            &predicted.1,
        )
    }

    /// Backtest rows for every fitted region, plus the continent and country
    /// means. Regions that cannot be scored are logged and left out.
    pub fn backtest(&self, output: &RunOutput, test_days: usize) -> Vec<BacktestRow> {
        let rows: Vec<BacktestRow> = output
            .results
            .iter()
            .filter_map(|result| {
                self.backtest_region(result, test_days)
                    .map_err(|e| warn!("no backtest for {}: {}", result.region, e))
                    .ok()
            })
            .collect();
        info!("backtested {} of {} regions", rows.len(), output.results.len());
        backtest::with_aggregates(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Horizon;
    use crate::lm::LmConfig;
    use crate::region::NO_SUBDIVISION;
    use crate::series::Observation;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, m, d).unwrap()
    }

    fn series(start_cases: f64, days: usize) -> ObservedSeries {
        let rows = (0..days)
            .map(|i| {
                let c = start_cases * 1.08f64.powi(i as i32);
                Observation::new(date(3, 1) + Duration::days(i as i64), c.round(), (c * 0.02).round())
            })
            .collect();
        ObservedSeries::new(rows).unwrap()
    }

    fn config() -> RunConfig {
        RunConfig::new(date(3, 25))
            .with_horizon(Horizon::DaysAfterStart(60))
            .with_lm(LmConfig::default().with_max_iterations(20))
            .with_seed(7)
            .with_workers(2)
    }

    #[test]
    fn test_region_seed_depends_on_region() {
        let a = region_seed(1, &RegionKey::country("Europe", "France"));
        let b = region_seed(1, &RegionKey::country("Europe", "Spain"));
        assert_ne!(a, b);
        assert_eq!(a, region_seed(1, &RegionKey::country("Europe", "France")));
    }

    #[test]
    fn test_outcomes() {
        let pipeline = ForecastPipeline::new(config()).unwrap();
        let fitted = RegionTask::new(RegionKey::country("Europe", "France"), series(120.0, 25), 6.7e7);
        let below = RegionTask::new(RegionKey::country("Europe", "Malta"), series(5.0, 25), 5e5);
        let no_pop = RegionTask::new(RegionKey::country("Europe", "Spain"), series(120.0, 25), 0.0);

        assert!(pipeline.run_region(&fitted, None).fitted().is_some());
        assert!(matches!(
            pipeline.run_region(&below, None),
            RegionOutcome::Skipped { .. }
        ));
        assert!(matches!(
            pipeline.run_region(&no_pop, None),
            RegionOutcome::Failed {
                error: ForecastError::MissingPopulation(_),
                ..
            }
        ));
    }

    #[test]
    fn test_run_excludes_unfitted_regions() {
        let pipeline = ForecastPipeline::new(config()).unwrap();
        let tasks = vec![
            RegionTask::new(RegionKey::new("Europe", "France", "Corsica"), series(150.0, 25), 3.4e5),
            RegionTask::new(RegionKey::new("Europe", "France", "Brittany"), series(5.0, 25), 3.3e6),
        ];
        let output = pipeline.run(&tasks, None).unwrap();

        assert_eq!(output.results.len(), 1);
        assert_eq!(output.skipped, vec![RegionKey::new("Europe", "France", "Brittany")]);
        assert_eq!(output.parameters.len(), 1);
        assert!(output
            .full
            .rows()
            .all(|r| r.region.province != "Brittany"));
        // Country, continent and world all equal the single fitted province.
        assert_eq!(output.full.countries.len(), output.full.regions.len());
        assert_eq!(
            output.full.world.last().map(|r| r.total_detected),
            output.full.regions.last().map(|r| r.total_detected)
        );
    }

    #[test]
    fn test_backtest_scores_days_after_today() {
        let pipeline = ForecastPipeline::new(config()).unwrap();
        // Observations run ten days past the run date.
        let tasks = vec![
            RegionTask::new(RegionKey::new("Europe", "France", "Corsica"), series(150.0, 35), 3.4e5),
            RegionTask::new(RegionKey::new("Europe", "France", "Alsace"), series(130.0, 35), 1.9e6),
        ];
        let output = pipeline.run(&tasks, None).unwrap();
        assert_eq!(output.results.len(), 2);

        let row = pipeline.backtest_region(&output.results[0], 7).unwrap();
        assert_eq!(row.train_end_date, Some(date(3, 25)));
        assert_eq!(row.test_start_date, Some(date(3, 26)));
        assert_eq!(row.test_end_date, Some(date(4, 1)));
        assert!(row.test_mape_cases.is_finite());

        // Two provinces, their country mean and their continent mean.
        let rows = pipeline.backtest(&output, 7);
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().any(|r| r.country == "France" && r.province == NO_SUBDIVISION));

        // Nothing observed after today.
        let spain = RegionTask::new(RegionKey::country("Europe", "Spain"), series(150.0, 25), 4.7e7);
        let short = pipeline.run(&[spain], None).unwrap();
        assert!(matches!(
            pipeline.backtest_region(&short.results[0], 7),
            Err(ForecastError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_wave_task_uses_corrected_variant() {
        let task = RegionTask::new(RegionKey::world(), series(150.0, 25), 1e6).with_wave(date(3, 10), None);
        assert_eq!(task.variant(), ModelVariant::InitialStateCorrection);
        let pipeline = ForecastPipeline::new(config()).unwrap();
        let result = pipeline.run_region(&task, None);
        let fitted = result.fitted().unwrap();
        assert_eq!(fitted.anchor, date(3, 10));
        assert!(fitted.parameters.initial_state_correction.is_some());
    }
}
