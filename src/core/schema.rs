use crate::utils::error::{PlatformError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Maximum number of ports of one direction an instance may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortLimit {
    Bounded(u32),
    Unbounded,
}

impl PortLimit {
    /// Manifest encoding: `-1` is unbounded, anything else a plain count.
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            -1 => Some(PortLimit::Unbounded),
            n if n >= 0 => u32::try_from(n).ok().map(PortLimit::Bounded),
            _ => None,
        }
    }

    /// Whether an instance already using `in_use` ports may take one more.
    pub fn admits_another(self, in_use: usize) -> bool {
        match self {
            PortLimit::Unbounded => true,
            PortLimit::Bounded(max) => in_use < max as usize,
        }
    }
}

impl fmt::Display for PortLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortLimit::Bounded(n) => write!(f, "{}", n),
            PortLimit::Unbounded => write!(f, "unbounded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: String,
    /// Literal default; `None` marks a required attribute.
    pub default: Option<String>,
}

impl AttributeSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Schema of one kind of platform component, as advertised by the engine.
#[derive(Debug)]
pub struct Species {
    name: String,
    attributes: Vec<AttributeSpec>,
    max_inputs: PortLimit,
    max_outputs: PortLimit,
    auto_counter: AtomicU64,
}

impl Species {
    /// Attributes are reordered so required ones come first; the relative
    /// order inside each group is kept.
    pub fn new(
        name: impl Into<String>,
        attributes: Vec<AttributeSpec>,
        max_inputs: PortLimit,
        max_outputs: PortLimit,
    ) -> Self {
        let (mut ordered, optional): (Vec<_>, Vec<_>) =
            attributes.into_iter().partition(AttributeSpec::is_required);
        ordered.extend(optional);

        Self {
            name: name.into(),
            attributes: ordered,
            max_inputs,
            max_outputs,
            auto_counter: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[AttributeSpec] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn max_inputs(&self) -> PortLimit {
        self.max_inputs
    }

    pub fn max_outputs(&self) -> PortLimit {
        self.max_outputs
    }

    /// `"<species><n>"`, counting from 0 across every platform that uses
    /// this species.
    pub(crate) fn next_auto_name(&self) -> String {
        let n = self.auto_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.name, n)
    }
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    species: BTreeMap<String, Arc<Species>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, species: Species) -> Result<Arc<Species>> {
        if self.species.contains_key(species.name()) {
            return Err(PlatformError::DuplicateSpecies {
                name: species.name().to_string(),
            });
        }
        let species = Arc::new(species);
        self.species
            .insert(species.name().to_string(), Arc::clone(&species));
        Ok(species)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Species>> {
        self.species
            .get(name)
            .cloned()
            .ok_or_else(|| PlatformError::UnknownSpecies {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.species.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Species>> {
        self.species.values()
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    /// Asks the engine for its component manifest and parses it.
    pub async fn discover(executable: &Path) -> Result<Self> {
        tracing::debug!("Querying component manifest from {}", executable.display());
        let output = tokio::process::Command::new(executable)
            .arg("--dump-components")
            .output()
            .await
            .map_err(|e| PlatformError::ConfigError {
                message: format!(
                    "cannot run '{}' to list components: {}",
                    executable.display(),
                    e
                ),
            })?;

        // Engines print the manifest on either stream.
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        let registry = Self::from_manifest(&text)?;
        tracing::info!("Discovered {} component species", registry.len());
        Ok(registry)
    }

    pub fn from_manifest(text: &str) -> Result<Self> {
        let mut registry = Self::new();
        let mut open: Option<PendingSpecies> = None;

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let mut tokens = raw.split_whitespace();
            let Some(directive) = tokens.next() else {
                continue;
            };

            let malformed = |message: String| PlatformError::ManifestError { line, message };

            match directive {
                "begin_component" => {
                    if let Some(pending) = &open {
                        return Err(malformed(format!(
                            "begin_component inside unterminated component '{}'",
                            pending.name
                        )));
                    }
                    let name = tokens
                        .next()
                        .ok_or_else(|| malformed("begin_component without a name".into()))?;
                    open = Some(PendingSpecies::new(name));
                }
                "end_component" => {
                    let pending = open.take().ok_or_else(|| {
                        malformed("end_component without matching begin_component".into())
                    })?;
                    registry.register(pending.finish())?;
                }
                "required_attr" | "optional_attr" | "in_ports" | "out_prts" => {
                    let pending = open.as_mut().ok_or_else(|| {
                        malformed(format!("{} outside of a component", directive))
                    })?;
                    let arg = tokens
                        .next()
                        .ok_or_else(|| malformed(format!("{} without an argument", directive)))?;

                    match directive {
                        "required_attr" => pending.attributes.push(AttributeSpec::required(arg)),
                        "optional_attr" => {
                            let default = tokens.collect::<Vec<_>>().join(" ");
                            if default.is_empty() {
                                return Err(malformed(format!(
                                    "optional attribute '{}' has no default",
                                    arg
                                )));
                            }
                            pending
                                .attributes
                                .push(AttributeSpec::optional(arg, default));
                        }
                        _ => {
                            let limit = arg
                                .parse::<i64>()
                                .ok()
                                .and_then(PortLimit::from_wire)
                                .ok_or_else(|| {
                                    malformed(format!("invalid port count '{}'", arg))
                                })?;
                            if directive == "in_ports" {
                                pending.max_inputs = limit;
                            } else {
                                pending.max_outputs = limit;
                            }
                        }
                    }
                }
                _ => tracing::debug!("Ignoring manifest line {}: {}", line, raw.trim()),
            }
        }

        if let Some(pending) = open {
            return Err(PlatformError::ManifestError {
                line: text.lines().count(),
                message: format!("component '{}' is never closed", pending.name),
            });
        }

        Ok(registry)
    }
}

struct PendingSpecies {
    name: String,
    attributes: Vec<AttributeSpec>,
    max_inputs: PortLimit,
    max_outputs: PortLimit,
}

impl PendingSpecies {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: Vec::new(),
            max_inputs: PortLimit::Unbounded,
            max_outputs: PortLimit::Unbounded,
        }
    }

    fn finish(self) -> Species {
        Species::new(self.name, self.attributes, self.max_inputs, self.max_outputs)
    }
}
