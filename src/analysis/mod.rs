//! Plan execution and result grouping.

pub mod aggregator;
pub mod executor;

pub use aggregator::{
    count_failed, group_by_section, kind_distribution, SectionGroup, SectionMap,
};
pub use executor::StepExecutor;
