pub mod attributes;
pub mod harness;
pub mod interrupt;
pub mod pool;
pub mod schema;
pub mod serializer;
pub mod stats;
pub mod topology;

pub use crate::domain::model::{AttrValue, Param, RunId, RunOutcome, Stats};
pub use crate::domain::ports::DocumentFormat;
pub use crate::utils::error::Result;
pub use attributes::{AttributeResolver, InstanceView};
pub use harness::{BuildOptions, OutputTarget, ReadyRuns, SimContext};
pub use schema::{AttributeSpec, PortLimit, SchemaRegistry, Species};
pub use serializer::{Format, XmlFormat};
pub use topology::{Endpoint, InstanceId, PortRef, Topology};
