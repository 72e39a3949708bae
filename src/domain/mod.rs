// Domain layer: value types shared by the schema, topology and harness, and
// the rendering port implemented by document formats.

pub mod model;
pub mod ports;
pub mod time;
