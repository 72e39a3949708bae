use crate::domain::model::{AttrValue, Link, Param};

/// A rendering strategy for platform documents. Each method produces one
/// section fragment; the serializer decides the section order.
pub trait DocumentFormat: Send + Sync {
    /// Name used to request the format, also the default file extension.
    fn name(&self) -> &'static str;

    fn begin(&self) -> String;
    fn end(&self) -> String;

    fn begin_platform(&self, name: &str) -> String;
    fn end_platform(&self) -> String;

    fn begin_instances(&self) -> String;
    fn end_instances(&self) -> String;
    fn begin_instance(&self, species: &str, name: &str) -> String;
    fn attribute(&self, key: &str, value: &AttrValue) -> String;
    fn end_instance(&self, species: &str) -> String;

    fn begin_links(&self) -> String;
    fn link(&self, link: &Link) -> String;
    fn end_links(&self) -> String;

    fn begin_params(&self) -> String;
    fn param(&self, param: &Param) -> String;
    fn end_params(&self) -> String;
}
