use crate::core::attributes::AttributeResolver;
use crate::core::topology::Topology;
use crate::domain::model::{AttrValue, Link, Param, ParamChild};
use crate::domain::ports::DocumentFormat;
use crate::utils::error::{PlatformError, Result};
use std::fmt;
use std::str::FromStr;

/// Document formats the engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Xml,
}

impl Format {
    pub fn renderer(self) -> &'static dyn DocumentFormat {
        match self {
            Format::Xml => &XmlFormat,
        }
    }

    pub fn name(self) -> &'static str {
        self.renderer().name()
    }
}

impl FromStr for Format {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xml" => Ok(Format::Xml),
            _ => Err(PlatformError::UnsupportedFormat {
                format: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Renders `topology` section by section. Attribute values are resolved
/// in each species' declared order, links follow instance declaration
/// order, so the output only depends on the topology itself.
pub fn render(
    topology: &Topology,
    format: &dyn DocumentFormat,
    resolver: &AttributeResolver,
) -> Result<String> {
    let mut parts = vec![format.begin(), format.begin_platform(topology.name())];

    parts.push(format.begin_instances());
    for instance in topology.instances() {
        let species = instance.species();
        parts.push(format.begin_instance(species.name(), instance.name()));
        for attribute in species.attributes() {
            let value = resolver.resolve(instance, topology.params(), &attribute.name)?;
            parts.push(format.attribute(&attribute.name, &value));
        }
        parts.push(format.end_instance(species.name()));
    }
    parts.push(format.end_instances());

    parts.push(format.begin_links());
    for link in topology.links() {
        parts.push(format.link(&link));
    }
    parts.push(format.end_links());
    parts.push(format.end_platform());

    parts.push(format.begin_params());
    for param in topology.params() {
        parts.push(format.param(param));
    }
    parts.push(format.end_params());
    parts.push(format.end());

    let mut document = parts.join("\n");
    document.push('\n');
    Ok(document)
}

impl Topology {
    pub fn render(&self, format: Format, resolver: &AttributeResolver) -> Result<String> {
        render(self, format.renderer(), resolver)
    }
}

/// Nested-element grammar read by the engine's `--run` mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlFormat;

impl DocumentFormat for XmlFormat {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn begin(&self) -> String {
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<vpsim source=\"platsim\">".to_string()
    }

    fn end(&self) -> String {
        "</vpsim>".to_string()
    }

    fn begin_platform(&self, name: &str) -> String {
        format!("<platform name=\"{}\">", escape(name))
    }

    fn end_platform(&self) -> String {
        "</platform>".to_string()
    }

    fn begin_instances(&self) -> String {
        "\t<ips>".to_string()
    }

    fn end_instances(&self) -> String {
        "\t</ips>".to_string()
    }

    fn begin_instance(&self, species: &str, name: &str) -> String {
        format!("\t\t<{} name=\"{}\">", species, escape(name))
    }

    fn attribute(&self, key: &str, value: &AttrValue) -> String {
        format!("\t\t\t<{}>{}</{}>", key, escape(&value.to_string()), key)
    }

    fn end_instance(&self, species: &str) -> String {
        format!("\t\t</{}>", species)
    }

    fn begin_links(&self) -> String {
        "\t<links>".to_string()
    }

    fn link(&self, link: &Link) -> String {
        format!(
            "\t\t<link><from port=\"{}\">{}</from><to port=\"{}\">{}</to></link>",
            escape(&link.src_port),
            escape(&link.src_instance),
            escape(&link.dst_port),
            escape(&link.dst_instance)
        )
    }

    fn end_links(&self) -> String {
        "\t</links>".to_string()
    }

    fn begin_params(&self) -> String {
        "<simulation>".to_string()
    }

    fn param(&self, param: &Param) -> String {
        let mut out = String::new();
        write_param(&mut out, param);
        out
    }

    fn end_params(&self) -> String {
        "</simulation>".to_string()
    }
}

fn write_param(out: &mut String, param: &Param) {
    out.push('<');
    out.push_str(&param.name);
    for (key, value) in &param.attrs {
        out.push_str(&format!(" {}=\"{}\"", key, escape(value)));
    }
    out.push('>');
    for child in &param.children {
        match child {
            ParamChild::Value(value) => out.push_str(&escape(&value.to_string())),
            ParamChild::Node(node) => write_param(out, node),
        }
    }
    out.push_str("</");
    out.push_str(&param.name);
    out.push('>');
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
