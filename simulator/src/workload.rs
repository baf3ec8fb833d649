//! Replays a JSON workload against a region and records every outcome.

use backing::MmapStore;
use log::info;
use log::warn;
use region::BackingStore;
use region::HeapStore;
use region::NoBacking;
use region::OwnerId;
use region::RegionConfig;
use region::RegionError;
use region::RegionTable;
use region::SharedRegion;
use region::Strategy;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackingKind {
    #[default]
    Mmap,
    Heap,
    None,
}

impl BackingKind {
    pub fn store(self) -> Box<dyn BackingStore> {
        match self {
            BackingKind::Mmap => Box::new(MmapStore::new()),
            BackingKind::Heap => Box::new(HeapStore::with_page_size(backing::page_size())),
            BackingKind::None => Box::new(NoBacking),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Allocate {
        size: usize,
        #[serde(default)]
        strategy: Strategy,
    },
    Deallocate {
        owner: u32,
    },
    Compact,
    AutoCompact {
        #[serde(default)]
        threshold: Option<f64>,
    },
    ConvertToBuddy,
    RevertFromBuddy,
    Reset,
    Stats,
    Blocks,
    SystemInfo,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Allocate { .. } => "allocate",
            Step::Deallocate { .. } => "deallocate",
            Step::Compact => "compact",
            Step::AutoCompact { .. } => "auto_compact",
            Step::ConvertToBuddy => "convert_to_buddy",
            Step::RevertFromBuddy => "revert_from_buddy",
            Step::Reset => "reset",
            Step::Stats => "stats",
            Step::Blocks => "blocks",
            Step::SystemInfo => "system_info",
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Workload {
    pub config: RegionConfig,
    pub backing: BackingKind,
    /// Size the region from the host's physical memory instead of `config`.
    pub detect: bool,
    pub steps: Vec<Step>,
}

#[derive(Debug, Serialize)]
pub struct Record {
    pub step: usize,
    pub op: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("cannot read workload: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse workload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Region(#[from] RegionError),
}

impl Workload {
    pub fn from_json(text: &str) -> Result<Self, WorkloadError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn region_config(&self) -> RegionConfig {
        if self.detect {
            let sizes = backing::detect_pool_sizes();
            RegionConfig {
                total_size: sizes.total_size,
                os_reserved: sizes.os_reserved,
                ..self.config
            }
        } else {
            self.config
        }
    }

    /// Runs every step in order. A failing step is recorded and the replay
    /// goes on with the next one.
    pub fn replay(&self) -> Result<Vec<Record>, WorkloadError> {
        let table = RegionTable::new(self.region_config(), self.backing.store())?;
        let region = SharedRegion::new(table);
        info!(
            "simulator: replaying {} steps on {:?} backing",
            self.steps.len(),
            self.backing
        );
        let records = self
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let outcome = apply(&region, step);
                if let Err(err) = &outcome {
                    warn!("simulator: step {index} ({}) failed: {err}", step.name());
                }
                Record::new(index, step.name(), outcome)
            })
            .collect();
        Ok(records)
    }
}

impl Record {
    fn new(step: usize, op: &'static str, outcome: Result<Value, WorkloadError>) -> Self {
        match outcome {
            Ok(value) => Self {
                step,
                op,
                ok: true,
                result: (!value.is_null()).then_some(value),
                error: None,
            },
            Err(err) => Self {
                step,
                op,
                ok: false,
                result: None,
                error: Some(err.to_string()),
            },
        }
    }
}

fn apply(region: &SharedRegion, step: &Step) -> Result<Value, WorkloadError> {
    let value = match *step {
        Step::Allocate { size, strategy } => to_value(region.allocate(size, strategy)?)?,
        Step::Deallocate { owner } => to_value(region.deallocate(OwnerId(owner))?)?,
        Step::Compact => to_value(region.compact()?)?,
        Step::AutoCompact { threshold } => to_value(region.auto_compact(threshold)?)?,
        Step::ConvertToBuddy => to_value(region.convert_to_buddy()?)?,
        Step::RevertFromBuddy => to_value(region.revert_from_buddy()?)?,
        Step::Reset => {
            region.reset();
            Value::Null
        }
        Step::Stats => to_value(region.stats())?,
        Step::Blocks => to_value(region.list_blocks())?,
        Step::SystemInfo => to_value(backing::system_info())?,
    };
    Ok(value)
}

fn to_value<T: Serialize>(value: T) -> Result<Value, WorkloadError> {
    Ok(serde_json::to_value(value)?)
}

/// Sizes placed by `demo`, in order.
pub const DEMO_SIZES: [usize; 5] = [100, 200, 150, 50, 300];

/// The same placements under each strategy, then two frees that leave holes
/// of 200, 50 and 208 units, and a small refill that each strategy places
/// differently.
pub fn demo_workloads() -> Vec<(Strategy, Workload)> {
    Strategy::ALL
        .into_iter()
        .map(|strategy| {
            let mut steps: Vec<Step> = DEMO_SIZES
                .iter()
                .map(|&size| Step::Allocate { size, strategy })
                .collect();
            steps.extend([
                Step::Allocate { size: 60, strategy },
                Step::Deallocate { owner: 2 },
                Step::Deallocate { owner: 4 },
                Step::Allocate { size: 40, strategy },
                Step::Blocks,
                Step::Stats,
            ]);
            let workload = Workload {
                backing: BackingKind::Heap,
                steps,
                ..Workload::default()
            };
            (strategy, workload)
        })
        .collect()
}
