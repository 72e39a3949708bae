use crate::core::schema::Species;
use crate::core::topology::Instance;
use crate::domain::model::{AttrValue, Param};
use crate::domain::time::TimeQuantity;
use crate::utils::error::{PlatformError, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Fallback computation for an attribute no one set explicitly.
pub type Formula = Arc<dyn Fn(&InstanceView<'_>) -> Result<AttrValue> + Send + Sync>;

/// Resolves instance attributes: explicit overrides first, then the
/// instance's own `name`/`domain`, then a formula registered for
/// `(species, attribute)`, then the schema default.
#[derive(Clone, Default)]
pub struct AttributeResolver {
    formulas: HashMap<(String, String), Formula>,
}

impl fmt::Debug for AttributeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.formulas.keys().collect();
        keys.sort();
        f.debug_struct("AttributeResolver")
            .field("formulas", &keys)
            .finish()
    }
}

impl AttributeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver preloaded with the stock formulas for the engine's common
    /// component species.
    pub fn with_defaults() -> Self {
        let mut resolver = Self::new();

        for cpu in ["Arm", "Arm64"] {
            resolver.register(cpu, "stop_on_first_core_done", |_| Ok(false.into()));
            resolver.register(cpu, "gdb_enable", |_| Ok(false.into()));
            resolver.register(cpu, "quantum", |view| {
                view.param("quantum")
                    .and_then(Param::first_value)
                    .cloned()
                    .ok_or_else(|| view.unresolved("quantum"))
            });
        }

        resolver.register("Memory", "load_elf", |view| {
            let has_elf = view
                .get_opt("elf_file")?
                .map(|v| !v.to_string().is_empty())
                .unwrap_or(false);
            Ok(has_elf.into())
        });
        resolver.register("Memory", "elf_file", |_| Ok("".into()));
        resolver.register("Memory", "dmi_enable", |_| Ok(true.into()));
        resolver.register("Memory", "channels", |_| Ok(1.into()));
        resolver.register("Memory", "channel_width", |_| Ok(8.into()));

        resolver.register("Interconnect", "is_mesh", |_| Ok(false.into()));
        resolver.register("Interconnect", "mesh_x", |_| Ok(0.into()));
        resolver.register("Interconnect", "mesh_y", |_| Ok(0.into()));
        resolver.register("Interconnect", "router_latency", |_| Ok(0.into()));

        for mapped in ["Memory", "ItCtrl", "Rtc", "Uart", "SmartUart"] {
            resolver.register(mapped, "size", |view| {
                let base = view.get_int("base_address")?;
                let end = view.get_int("end_address")?;
                Ok((end - base + 1).into())
            });
            resolver.register(mapped, "cycle_duration", |_| Ok(TimeQuantity::ns(1).into()));
            resolver.register(mapped, "read_cycles", |_| Ok(0.into()));
            resolver.register(mapped, "write_cycles", |_| Ok(0.into()));
        }

        resolver
    }

    /// Registers (or replaces) the formula for `(species, attribute)`.
    pub fn register<F>(&mut self, species: &str, attribute: &str, formula: F)
    where
        F: Fn(&InstanceView<'_>) -> Result<AttrValue> + Send + Sync + 'static,
    {
        self.formulas
            .insert((species.to_string(), attribute.to_string()), Arc::new(formula));
    }

    pub fn has_formula(&self, species: &str, attribute: &str) -> bool {
        self.formulas
            .contains_key(&(species.to_string(), attribute.to_string()))
    }

    fn formula(&self, species: &str, attribute: &str) -> Option<&Formula> {
        self.formulas
            .get(&(species.to_string(), attribute.to_string()))
    }

    /// Normalized value of `attribute` on `instance`. `params` are the
    /// platform's global settings, readable by formulas.
    pub fn resolve(&self, instance: &Instance, params: &[Param], attribute: &str) -> Result<AttrValue> {
        let resolution = Resolution {
            resolver: self,
            instance,
            params,
            in_progress: RefCell::new(Vec::new()),
        };
        resolution.resolve(attribute)
    }
}

/// State of one top-level `resolve` call; tracks which formulas are
/// currently running so a cycle fails instead of recursing forever.
struct Resolution<'a> {
    resolver: &'a AttributeResolver,
    instance: &'a Instance,
    params: &'a [Param],
    in_progress: RefCell<Vec<String>>,
}

impl Resolution<'_> {
    fn resolve(&self, attribute: &str) -> Result<AttrValue> {
        if let Some(value) = self.instance.attr_override(attribute) {
            return Ok(value.normalized());
        }

        match attribute {
            "name" => return Ok(AttrValue::Text(self.instance.name().to_string())),
            "domain" => return Ok(AttrValue::Int(i64::from(self.instance.domain()))),
            _ => {}
        }

        let species = self.instance.species();
        if let Some(formula) = self.resolver.formula(species.name(), attribute) {
            if self.in_progress.borrow().iter().any(|a| a == attribute) {
                return Err(PlatformError::AttributeCycle {
                    instance: self.instance.name().to_string(),
                    attribute: attribute.to_string(),
                });
            }
            self.in_progress.borrow_mut().push(attribute.to_string());
            let result = formula(&InstanceView { resolution: self });
            self.in_progress.borrow_mut().pop();
            return result.map(|v| v.normalized());
        }

        if let Some(default) = species.attribute(attribute).and_then(|a| a.default.as_ref()) {
            return Ok(AttrValue::Text(default.clone()));
        }

        Err(PlatformError::UnresolvedAttribute {
            instance: self.instance.name().to_string(),
            attribute: attribute.to_string(),
        })
    }
}

/// Read-only view of an instance handed to formulas.
pub struct InstanceView<'a> {
    resolution: &'a Resolution<'a>,
}

impl InstanceView<'_> {
    pub fn name(&self) -> &str {
        self.resolution.instance.name()
    }

    pub fn species(&self) -> &Species {
        self.resolution.instance.species()
    }

    pub fn domain(&self) -> u32 {
        self.resolution.instance.domain()
    }

    /// Resolved value of another attribute of the same instance.
    pub fn get(&self, attribute: &str) -> Result<AttrValue> {
        self.resolution.resolve(attribute)
    }

    /// Like [`get`](Self::get), but an attribute with no value at all is
    /// `None` instead of an error.
    pub fn get_opt(&self, attribute: &str) -> Result<Option<AttrValue>> {
        match self.get(attribute) {
            Ok(v) => Ok(Some(v)),
            Err(PlatformError::UnresolvedAttribute { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_int(&self, attribute: &str) -> Result<i64> {
        let value = self.get(attribute)?;
        value
            .as_i64()
            .ok_or_else(|| PlatformError::InvalidConfigValueError {
                field: format!("{}.{}", self.name(), attribute),
                value: value.to_string(),
                reason: "expected an integer".to_string(),
            })
    }

    /// First global parameter node with this name.
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.resolution.params.iter().find(|p| p.name == name)
    }

    pub fn unresolved(&self, attribute: &str) -> PlatformError {
        PlatformError::UnresolvedAttribute {
            instance: self.name().to_string(),
            attribute: attribute.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{AttributeSpec, PortLimit, Species};
    use crate::core::topology::Topology;

    fn species(name: &str, attributes: Vec<AttributeSpec>) -> Arc<Species> {
        Arc::new(Species::new(
            name,
            attributes,
            PortLimit::Unbounded,
            PortLimit::Unbounded,
        ))
    }

    #[test]
    fn test_override_beats_formula() {
        let dev = species("Dev", vec![AttributeSpec::required("latency")]);
        let mut resolver = AttributeResolver::new();
        resolver.register("Dev", "latency", |_| Ok(1.into()));

        let mut topo = Topology::detached("T");
        let id = topo.add_instance(&dev, Some("d")).unwrap();
        assert_eq!(
            resolver.resolve(topo.instance(id), &[], "latency").unwrap(),
            AttrValue::Int(1)
        );

        topo.set_attr(id, "latency", 2).unwrap();
        assert_eq!(
            resolver.resolve(topo.instance(id), &[], "latency").unwrap(),
            AttrValue::Int(2)
        );
    }

    #[test]
    fn test_missing_required_attribute() {
        let dev = species("Dev", vec![AttributeSpec::required("latency")]);
        let mut topo = Topology::detached("T");
        let id = topo.add_instance(&dev, Some("d")).unwrap();

        let err = AttributeResolver::new()
            .resolve(topo.instance(id), &[], "latency")
            .unwrap_err();
        assert!(matches!(err, PlatformError::UnresolvedAttribute { .. }));
    }

    #[test]
    fn test_optional_default_used_last() {
        let dev = species("Dev", vec![AttributeSpec::optional("width", "32")]);
        let mut topo = Topology::detached("T");
        let id = topo.add_instance(&dev, Some("d")).unwrap();

        let resolver = AttributeResolver::new();
        assert_eq!(
            resolver.resolve(topo.instance(id), &[], "width").unwrap(),
            AttrValue::from("32")
        );

        let mut with_formula = AttributeResolver::new();
        with_formula.register("Dev", "width", |_| Ok(64.into()));
        assert_eq!(
            with_formula.resolve(topo.instance(id), &[], "width").unwrap(),
            AttrValue::Int(64)
        );
    }

    #[test]
    fn test_values_are_normalized() {
        let dev = species("Dev", vec![]);
        let mut resolver = AttributeResolver::new();
        resolver.register("Dev", "period", |_| Ok(TimeQuantity::ns(2).into()));

        let mut topo = Topology::detached("T");
        let id = topo.add_instance(&dev, Some("d")).unwrap();
        topo.set_attr(id, "enabled", true).unwrap();

        let inst = topo.instance(id);
        assert_eq!(resolver.resolve(inst, &[], "period").unwrap(), AttrValue::Int(2_000));
        assert_eq!(resolver.resolve(inst, &[], "enabled").unwrap(), AttrValue::Int(1));
    }

    #[test]
    fn test_formula_reads_other_attributes() {
        let mem = species(
            "Memory",
            vec![
                AttributeSpec::required("base_address"),
                AttributeSpec::required("end_address"),
                AttributeSpec::required("size"),
            ],
        );
        let mut topo = Topology::detached("T");
        let id = topo.add_instance(&mem, Some("ram")).unwrap();
        topo.set_attr(id, "base_address", "0x1000").unwrap();
        topo.set_attr(id, "end_address", 0x1fff_i64).unwrap();

        let resolver = AttributeResolver::with_defaults();
        let inst = topo.instance(id);
        assert_eq!(resolver.resolve(inst, &[], "size").unwrap(), AttrValue::Int(0x1000));
        assert_eq!(resolver.resolve(inst, &[], "load_elf").unwrap(), AttrValue::Int(0));
        assert_eq!(
            resolver.resolve(inst, &[], "cycle_duration").unwrap(),
            AttrValue::Int(1_000)
        );
    }

    #[test]
    fn test_load_elf_follows_elf_file() {
        let mem = species("Memory", vec![]);
        let mut topo = Topology::detached("T");
        let id = topo.add_instance(&mem, Some("ram")).unwrap();
        topo.set_attr(id, "elf_file", "boot.elf").unwrap();

        let resolver = AttributeResolver::with_defaults();
        assert_eq!(
            resolver.resolve(topo.instance(id), &[], "load_elf").unwrap(),
            AttrValue::Int(1)
        );
    }

    #[test]
    fn test_quantum_comes_from_params() {
        let cpu = species("Arm64", vec![]);
        let mut topo = Topology::detached("T");
        let id = topo.add_instance(&cpu, Some("cpu0")).unwrap();
        let params = vec![Param::new("quantum").with_value(TimeQuantity::us(1))];

        let resolver = AttributeResolver::with_defaults();
        assert_eq!(
            resolver.resolve(topo.instance(id), &params, "quantum").unwrap(),
            AttrValue::Int(1_000_000)
        );
        assert!(resolver.resolve(topo.instance(id), &[], "quantum").is_err());
    }

    #[test]
    fn test_intrinsic_name_and_domain() {
        let dev = species("Dev", vec![]);
        let mut topo = Topology::detached("T");
        let id = topo.add_instance(&dev, Some("d0")).unwrap();

        let resolver = AttributeResolver::new();
        let inst = topo.instance(id);
        assert_eq!(resolver.resolve(inst, &[], "name").unwrap(), AttrValue::from("d0"));
        assert_eq!(
            resolver.resolve(inst, &[], "domain").unwrap(),
            AttrValue::Int(i64::from(inst.domain()))
        );
    }

    #[test]
    fn test_cycle_is_detected() {
        let dev = species("Dev", vec![]);
        let mut resolver = AttributeResolver::new();
        resolver.register("Dev", "a", |view| view.get("b"));
        resolver.register("Dev", "b", |view| view.get("a"));

        let mut topo = Topology::detached("T");
        let id = topo.add_instance(&dev, Some("d")).unwrap();

        let err = resolver.resolve(topo.instance(id), &[], "a").unwrap_err();
        assert!(matches!(
            err,
            PlatformError::AttributeCycle { ref attribute, .. } if attribute == "a"
        ));
    }
}
