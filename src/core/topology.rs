use crate::core::schema::{PortLimit, Species};
use crate::domain::model::{AttrValue, Link, Param};
use crate::utils::error::{PlatformError, PortDirection, Result};
use crate::utils::validation::validate_identifier;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TOPOLOGY_SERIAL: AtomicU64 = AtomicU64::new(0);

/// Handle to an instance. Only valid for the topology that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    topology: u64,
    index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub instance: InstanceId,
    pub port: String,
}

/// Either side of a connection. A bare instance stands for a fresh port on
/// that instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Instance(InstanceId),
    Port(PortRef),
}

impl Endpoint {
    pub fn instance(&self) -> InstanceId {
        match self {
            Endpoint::Instance(id) => *id,
            Endpoint::Port(port) => port.instance,
        }
    }
}

impl From<InstanceId> for Endpoint {
    fn from(id: InstanceId) -> Self {
        Endpoint::Instance(id)
    }
}

impl From<PortRef> for Endpoint {
    fn from(port: PortRef) -> Self {
        Endpoint::Port(port)
    }
}

impl From<&PortRef> for Endpoint {
    fn from(port: &PortRef) -> Self {
        Endpoint::Port(port.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortRole {
    Unclassified,
    ConsumedInput,
    BoundOutput(PortRef),
}

#[derive(Debug, Clone)]
pub struct Port {
    name: String,
    role: PortRole,
}

impl Port {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &PortRole {
        &self.role
    }
}

/// One component placed in a platform.
#[derive(Debug)]
pub struct Instance {
    name: String,
    species: Arc<Species>,
    overrides: BTreeMap<String, AttrValue>,
    domain: u32,
    ports: Vec<Port>,
    next_port: u32,
    // indices into `ports`, in binding order
    bound_outputs: Vec<usize>,
    consumed_inputs: usize,
}

impl Instance {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn species(&self) -> &Species {
        &self.species
    }

    pub fn domain(&self) -> u32 {
        self.domain
    }

    pub fn attr_override(&self, attribute: &str) -> Option<&AttrValue> {
        self.overrides.get(attribute)
    }

    pub fn overrides(&self) -> &BTreeMap<String, AttrValue> {
        &self.overrides
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn bound_output_count(&self) -> usize {
        self.bound_outputs.len()
    }

    pub fn consumed_input_count(&self) -> usize {
        self.consumed_inputs
    }

    /// Bound output ports with their destinations, in binding order.
    pub fn bound_outputs(&self) -> impl Iterator<Item = (&str, &PortRef)> {
        self.bound_outputs
            .iter()
            .filter_map(|&i| match &self.ports[i].role {
                PortRole::BoundOutput(dst) => Some((self.ports[i].name.as_str(), dst)),
                _ => None,
            })
    }

    fn port_index(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name == name)
    }

    fn create_port(&mut self, name: Option<&str>) -> usize {
        if let Some(name) = name {
            if let Some(index) = self.port_index(name) {
                return index;
            }
            self.ports.push(Port {
                name: name.to_string(),
                role: PortRole::Unclassified,
            });
            return self.ports.len() - 1;
        }

        let name = loop {
            self.next_port += 1;
            let candidate = format!("p{}", self.next_port);
            if self.port_index(&candidate).is_none() {
                break candidate;
            }
        };
        self.ports.push(Port {
            name,
            role: PortRole::Unclassified,
        });
        self.ports.len() - 1
    }
}

/// A platform: ordered instances, their port bindings and the global
/// parameter tree.
#[derive(Debug)]
pub struct Topology {
    name: String,
    serial: u64,
    instances: Vec<Instance>,
    by_name: HashMap<String, usize>,
    params: Vec<Param>,
    domains: Arc<AtomicU32>,
}

impl Topology {
    /// Instances capture the current value of `domains` when created.
    pub(crate) fn new(name: &str, domains: Arc<AtomicU32>) -> Result<Self> {
        validate_identifier("platform name", name)?;
        Ok(Self {
            name: name.to_string(),
            serial: NEXT_TOPOLOGY_SERIAL.fetch_add(1, Ordering::Relaxed),
            instances: Vec::new(),
            by_name: HashMap::new(),
            params: Vec::new(),
            domains,
        })
    }

    #[cfg(test)]
    pub(crate) fn detached(name: &str) -> Self {
        Self::new(name, Arc::new(AtomicU32::new(1))).expect("valid test platform name")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts a new coherence domain; instances created from now on belong
    /// to it.
    pub fn new_address_domain(&self) -> u32 {
        self.domains.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_domain(&self) -> u32 {
        self.domains.load(Ordering::SeqCst)
    }

    pub fn add_instance(&mut self, species: &Arc<Species>, name: Option<&str>) -> Result<InstanceId> {
        let name = match name {
            Some(name) => {
                validate_identifier("instance name", name)?;
                if self.by_name.contains_key(name) {
                    return Err(PlatformError::DuplicateInstance {
                        topology: self.name.clone(),
                        name: name.to_string(),
                    });
                }
                name.to_string()
            }
            None => loop {
                let candidate = species.next_auto_name();
                if !self.by_name.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let index = self.instances.len();
        let domain = self.current_domain();
        tracing::debug!("{}: adding {} '{}'", self.name, species.name(), name);
        self.by_name.insert(name.clone(), index);
        self.instances.push(Instance {
            name,
            species: Arc::clone(species),
            overrides: BTreeMap::new(),
            domain,
            ports: Vec::new(),
            next_port: 0,
            bound_outputs: Vec::new(),
            consumed_inputs: 0,
        });
        Ok(self.id(index))
    }

    pub fn set_attr(&mut self, id: InstanceId, attribute: &str, value: impl Into<AttrValue>) -> Result<()> {
        validate_identifier("attribute name", attribute)?;
        let instance = self.instance_mut(id)?;
        instance.overrides.insert(attribute.to_string(), value.into());
        Ok(())
    }

    pub fn add_param(&mut self, param: Param) {
        self.params.push(param);
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn find(&self, name: &str) -> Option<InstanceId> {
        self.by_name.get(name).map(|&index| self.id(index))
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        if id.topology != self.serial {
            return None;
        }
        self.instances.get(id.index)
    }

    /// # Panics
    /// If `id` was issued by another topology.
    pub fn instance(&self, id: InstanceId) -> &Instance {
        self.get(id)
            .unwrap_or_else(|| panic!("instance id {:?} does not belong to '{}'", id, self.name))
    }

    /// Instances in declaration order.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Returns the named port, creating it if needed. Without a name a fresh
    /// `p<n>` port is created.
    pub fn port(&mut self, id: InstanceId, name: Option<&str>) -> Result<PortRef> {
        let instance = self.instance_mut(id)?;
        let index = instance.create_port(name);
        Ok(PortRef {
            instance: id,
            port: instance.ports[index].name.clone(),
        })
    }

    /// Binds `src` as an output to `dst` as an input and returns the
    /// destination port, so a path can be continued from there. On error
    /// the topology is left unchanged.
    pub fn connect(&mut self, src: impl Into<Endpoint>, dst: impl Into<Endpoint>) -> Result<PortRef> {
        let src = src.into();
        let dst = dst.into();

        self.check_unclassified(&src)?;
        self.check_unclassified(&dst)?;
        if let (Endpoint::Port(a), Endpoint::Port(b)) = (&src, &dst) {
            if a == b {
                return Err(PlatformError::PortAlreadyBound {
                    instance: self.lookup(a.instance)?.name.clone(),
                    port: a.port.clone(),
                });
            }
        }

        let source = self.lookup(src.instance())?;
        if !source.species.max_outputs().admits_another(source.bound_outputs.len()) {
            return Err(capacity_error(source, PortDirection::Output, source.species.max_outputs()));
        }
        let target = self.lookup(dst.instance())?;
        if !target.species.max_inputs().admits_another(target.consumed_inputs) {
            return Err(capacity_error(target, PortDirection::Input, target.species.max_inputs()));
        }

        // Named ports first, so a fresh port can never take a name that the
        // other side is about to create.
        let ((src_ref, src_index), (dst_ref, dst_index)) = match src {
            Endpoint::Instance(_) => {
                let dst = self.materialize(dst)?;
                (self.materialize(src)?, dst)
            }
            Endpoint::Port(_) => {
                let src = self.materialize(src)?;
                (src, self.materialize(dst)?)
            }
        };

        let target = self.instance_mut(dst_ref.instance)?;
        target.ports[dst_index].role = PortRole::ConsumedInput;
        target.consumed_inputs += 1;

        let source = self.instance_mut(src_ref.instance)?;
        source.ports[src_index].role = PortRole::BoundOutput(dst_ref.clone());
        source.bound_outputs.push(src_index);

        tracing::trace!(
            "{}: {}.{} -> {}.{}",
            self.name,
            self.instance(src_ref.instance).name,
            src_ref.port,
            self.instance(dst_ref.instance).name,
            dst_ref.port
        );
        Ok(dst_ref)
    }

    /// Left-to-right builder for `a -> b -> c` chains.
    pub fn path(&mut self, start: impl Into<Endpoint>) -> ConnectionPath<'_> {
        ConnectionPath {
            topology: self,
            current: start.into(),
            hops: 0,
        }
    }

    /// Every binding, instances in declaration order and each instance's
    /// outputs in binding order.
    pub fn links(&self) -> Vec<Link> {
        self.instances
            .iter()
            .flat_map(|instance| {
                instance.bound_outputs().map(move |(port, dst)| Link {
                    src_instance: instance.name.clone(),
                    src_port: port.to_string(),
                    dst_instance: self.instance(dst.instance).name.clone(),
                    dst_port: dst.port.clone(),
                })
            })
            .collect()
    }

    fn id(&self, index: usize) -> InstanceId {
        InstanceId {
            topology: self.serial,
            index,
        }
    }

    fn lookup(&self, id: InstanceId) -> Result<&Instance> {
        self.get(id).ok_or_else(|| PlatformError::UnknownInstance {
            topology: self.name.clone(),
            name: format!("#{}", id.index),
        })
    }

    fn instance_mut(&mut self, id: InstanceId) -> Result<&mut Instance> {
        if id.topology != self.serial || id.index >= self.instances.len() {
            return Err(PlatformError::UnknownInstance {
                topology: self.name.clone(),
                name: format!("#{}", id.index),
            });
        }
        Ok(&mut self.instances[id.index])
    }

    fn check_unclassified(&self, endpoint: &Endpoint) -> Result<()> {
        let Endpoint::Port(port_ref) = endpoint else {
            return Ok(());
        };
        let instance = self.lookup(port_ref.instance)?;
        match instance.port(&port_ref.port) {
            Some(port) if port.role != PortRole::Unclassified => Err(PlatformError::PortAlreadyBound {
                instance: instance.name.clone(),
                port: port_ref.port.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn materialize(&mut self, endpoint: Endpoint) -> Result<(PortRef, usize)> {
        let (id, name) = match &endpoint {
            Endpoint::Instance(id) => (*id, None),
            Endpoint::Port(port) => (port.instance, Some(port.port.as_str())),
        };
        let instance = self.instance_mut(id)?;
        let index = instance.create_port(name);
        let port = PortRef {
            instance: id,
            port: instance.ports[index].name.clone(),
        };
        Ok((port, index))
    }
}

fn capacity_error(instance: &Instance, direction: PortDirection, limit: PortLimit) -> PlatformError {
    PlatformError::PortCapacityExceeded {
        instance: instance.name.clone(),
        direction,
        limit: match limit {
            PortLimit::Bounded(n) => n,
            PortLimit::Unbounded => u32::MAX,
        },
    }
}

/// Chain of connections built hop by hop. After the first hop each new
/// link leaves from a fresh port of the instance just reached.
pub struct ConnectionPath<'t> {
    topology: &'t mut Topology,
    current: Endpoint,
    hops: usize,
}

impl ConnectionPath<'_> {
    pub fn to(mut self, next: impl Into<Endpoint>) -> Result<Self> {
        let src = if self.hops == 0 {
            self.current.clone()
        } else {
            Endpoint::Instance(self.current.instance())
        };
        let reached = self.topology.connect(src, next)?;
        self.current = Endpoint::Port(reached);
        self.hops += 1;
        Ok(self)
    }

    /// Where the chain stopped: the last destination port, or the start if
    /// no hop was made.
    pub fn end(self) -> Endpoint {
        self.current
    }
}
