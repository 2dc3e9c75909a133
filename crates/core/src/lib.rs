use thiserror::Error;

pub mod config;
mod inspector;
pub mod report;

pub use config::{CheckConfig, ConfigError, Region, Severity};
pub use inspector::{DomainInspector, DomainSource, DomainStatus};
pub use report::{CheckResult, Status, Summary};

#[derive(Error, Debug)]
pub enum InspectError {
    #[error("region {0} is not enabled for this check")]
    UnsupportedRegion(Region),
    #[error("listing domains in {region} failed: {reason}")]
    Listing { region: Region, reason: String },
}
