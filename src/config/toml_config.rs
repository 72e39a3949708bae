use crate::config::engine::EngineConfig;
use crate::core::harness::{BuildOptions, OutputTarget, SimContext};
use crate::core::serializer::Format;
use crate::core::topology::{Endpoint, Topology};
use crate::domain::model::{AttrValue, Param};
use crate::domain::time::TimeQuantity;
use crate::utils::error::{PlatformError, Result};
use crate::utils::validation::{validate_identifier, validate_path, validate_positive_number, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env pattern is valid"));

static TIME_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\s*(ps|ns|us|ms)$").expect("time pattern is valid"));

/// Declarative platform description loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub platform: PlatformInfo,
    pub engine: Option<EngineSection>,
    pub build: Option<BuildSection>,
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    #[serde(default)]
    pub params: Vec<ParamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub name: String,
    pub description: Option<String>,
}

/// Overrides for the `PLATSIM_*` environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSection {
    pub executable: Option<String>,
    pub work_root: Option<String>,
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSection {
    pub formats: Option<Vec<String>>,
    /// Explicit document path; defaults to `<work_root>/<platform>.<format>`.
    pub output: Option<String>,
    pub write_document: Option<bool>,
    pub simulate: Option<bool>,
    pub silent: Option<bool>,
    pub outstream: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub species: String,
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, toml::Value>,
    /// Start a new coherence domain before creating this instance.
    #[serde(default)]
    pub new_domain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub from: String,
    pub from_port: Option<String>,
    pub to: String,
    pub to_port: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamConfig {
    pub name: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Vec<toml::Value>,
    #[serde(default)]
    pub children: Vec<ParamConfig>,
}

impl PlatformConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content);
        Ok(toml::from_str(&processed)?)
    }

    /// Replaces `${VAR}` with the variable's value; unset variables are
    /// left as written.
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    pub fn name(&self) -> &str {
        &self.platform.name
    }

    /// Environment settings with this file's `[engine]` section applied on
    /// top. `PLATSIM_ENGINE` is only needed when the file names no
    /// executable.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        self.engine_config_with(|key| std::env::var(key).ok())
    }

    fn engine_config_with<F>(&self, lookup: F) -> Result<EngineConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let section = self.engine.clone().unwrap_or_default();
        let mut config = match &section.executable {
            Some(executable) => EngineConfig::new(executable),
            None => EngineConfig::from_lookup(&lookup)?,
        };
        if let Some(root) = section.work_root {
            config.work_root = PathBuf::from(root);
        }
        if let Some(workers) = section.max_workers {
            config.max_workers = workers;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn build_options(&self) -> Result<BuildOptions> {
        let mut options = BuildOptions::default();
        let Some(build) = &self.build else {
            return Ok(options);
        };

        if let Some(formats) = &build.formats {
            options.formats = formats
                .iter()
                .map(|f| f.parse::<Format>())
                .collect::<Result<Vec<_>>>()?;
        }
        options.output = match (build.write_document.unwrap_or(true), &build.output) {
            (false, _) => None,
            (true, Some(path)) => Some(OutputTarget::Path(PathBuf::from(path))),
            (true, None) => Some(OutputTarget::WorkRoot),
        };
        options.simulate = build.simulate.unwrap_or(options.simulate);
        options.silent = build.silent.unwrap_or(options.silent);
        options.outstream = build.outstream.as_ref().map(PathBuf::from);
        Ok(options)
    }

    /// Instantiates the platform against the context's schema. Instances are
    /// created in file order, then links are connected in file order.
    pub fn build_topology(&self, ctx: &SimContext) -> Result<Topology> {
        let mut topology = ctx.new_topology(&self.platform.name)?;

        for instance in &self.instances {
            if instance.new_domain {
                topology.new_address_domain();
            }
            let species = ctx.species(&instance.species)?;
            let id = topology.add_instance(&species, instance.name.as_deref())?;
            for (key, value) in &instance.attributes {
                topology.set_attr(id, key, attr_value(key, value)?)?;
            }
        }

        for link in &self.links {
            let src = endpoint(&mut topology, &link.from, link.from_port.as_deref())?;
            let dst = endpoint(&mut topology, &link.to, link.to_port.as_deref())?;
            topology.connect(src, dst)?;
        }

        for param in &self.params {
            topology.add_param(param.to_param()?);
        }

        tracing::debug!(
            "Built platform '{}' with {} instances and {} links",
            topology.name(),
            topology.len(),
            self.links.len()
        );
        Ok(topology)
    }
}

impl ParamConfig {
    fn to_param(&self) -> Result<Param> {
        let mut param = Param::new(&self.name);
        for (key, value) in &self.attrs {
            param = param.with_attr(key, value);
        }
        for value in &self.values {
            param = param.with_value(attr_value(&self.name, value)?);
        }
        for child in &self.children {
            param = param.with_child(child.to_param()?);
        }
        Ok(param)
    }
}

fn endpoint(topology: &mut Topology, instance: &str, port: Option<&str>) -> Result<Endpoint> {
    let id = topology
        .find(instance)
        .ok_or_else(|| PlatformError::UnknownInstance {
            topology: topology.name().to_string(),
            name: instance.to_string(),
        })?;
    Ok(match port {
        Some(port) => Endpoint::Port(topology.port(id, Some(port))?),
        None => Endpoint::Instance(id),
    })
}

/// Scalars map onto attribute values; strings shaped like `10ns` become
/// time quantities.
pub fn attr_value(field: &str, value: &toml::Value) -> Result<AttrValue> {
    match value {
        toml::Value::Integer(i) => Ok(AttrValue::Int(*i)),
        toml::Value::Float(f) => Ok(AttrValue::Float(*f)),
        toml::Value::Boolean(b) => Ok(AttrValue::Bool(*b)),
        toml::Value::String(s) if TIME_LITERAL.is_match(s.trim()) => {
            Ok(AttrValue::Time(s.parse::<TimeQuantity>()?))
        }
        toml::Value::String(s) => Ok(AttrValue::Text(s.clone())),
        other => Err(PlatformError::InvalidConfigValueError {
            field: field.to_string(),
            value: other.to_string(),
            reason: "expected an integer, float, boolean or string".to_string(),
        }),
    }
}

impl Validate for PlatformConfig {
    fn validate(&self) -> Result<()> {
        validate_identifier("platform.name", &self.platform.name)?;

        for instance in &self.instances {
            validate_identifier("instances.species", &instance.species)?;
            if let Some(name) = &instance.name {
                validate_identifier("instances.name", name)?;
            }
        }

        for link in &self.links {
            validate_identifier("links.from", &link.from)?;
            validate_identifier("links.to", &link.to)?;
        }

        if let Some(engine) = &self.engine {
            if let Some(executable) = &engine.executable {
                validate_path("engine.executable", executable)?;
            }
            if let Some(workers) = engine.max_workers {
                validate_positive_number("engine.max_workers", workers, 1)?;
            }
        }

        if let Some(build) = &self.build {
            if let Some(formats) = &build.formats {
                if formats.is_empty() {
                    return Err(PlatformError::InvalidConfigValueError {
                        field: "build.formats".to_string(),
                        value: "[]".to_string(),
                        reason: "at least one document format is required".to_string(),
                    });
                }
                for format in formats {
                    format.parse::<Format>()?;
                }
            }
        }

        Ok(())
    }
}
