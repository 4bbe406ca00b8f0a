//! Batch orchestration modules

pub mod aggregate;
pub mod batch;
pub mod dispatch;
pub mod driver;
pub mod engine;
pub mod grouping;
pub mod jobs;
pub mod mosaic;
pub mod retry;
pub mod scaling;

// Re-export main types
pub use aggregate::{LayerDates, TemporalAggregator};
pub use batch::{BatchContext, BatchInput, PipelineReport, PipelineRequest, TimescanUnit, TimeseriesUnit};
pub use dispatch::{DispatchOptions, Dispatcher, ExecutionStrategy, UnitResult, WorkUnit};
pub use driver::{BatchDriver, Stage, StageReport, StageState, UnresolvedUnit};
pub use engine::{
    GdalBuildVrt, GdalConverter, LayerIndexBuilder, LayeredIndex, ProcessingEngine, RasterConverter, SnapOtbEngine,
};
pub use grouping::{Grouper, ProcessingUnit, UnitInputs};
pub use jobs::{CommandSpec, CommandTemplate, JobRunner, SubprocessRunner};
pub use mosaic::{MosaicPlanner, MosaicUnit};
pub use retry::{Backoff, RetryPolicy};
pub use scaling::{ProductFamily, ScalingRule};
