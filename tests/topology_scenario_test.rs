use platsim::core::{AttributeSpec, PortLimit, Species};
use platsim::domain::model::{AttrValue, Param};
use platsim::utils::error::PortDirection;
use platsim::{EngineConfig, Format, PlatformError, SchemaRegistry, SimContext, TimeQuantity};
use std::collections::HashSet;

const MANIFEST: &str = "\
vpsim component manifest v2
begin_component Source
required_attr period
in_ports 0
out_prts 1
end_component
begin_component Sink
optional_attr latency 3
in_ports 1
out_prts 0
end_component
begin_component Bus
optional_attr width 64
in_ports -1
out_prts -1
end_component
";

fn context() -> SimContext {
    SimContext::new(
        EngineConfig::new("/opt/vpsim/bin/vpsim"),
        SchemaRegistry::from_manifest(MANIFEST).unwrap(),
    )
    .unwrap()
}

#[test]
fn test_single_link_and_capacity_scenario() {
    let ctx = context();
    let mut topology = ctx.new_topology("T").unwrap();
    let source = ctx.species("Source").unwrap();
    let sink = ctx.species("Sink").unwrap();

    let a = topology.add_instance(&source, Some("A")).unwrap();
    let b = topology.add_instance(&sink, Some("B")).unwrap();
    let c = topology.add_instance(&sink, Some("C")).unwrap();
    topology.set_attr(a, "period", TimeQuantity::ns(1)).unwrap();

    let consumed = topology.connect(a, b).unwrap();
    assert_eq!(consumed.instance, b);

    let err = topology.connect(a, c).unwrap_err();
    assert!(matches!(
        err,
        PlatformError::PortCapacityExceeded {
            ref instance,
            direction: PortDirection::Output,
            limit: 1,
        } if instance == "A"
    ));

    let links = topology.links();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].src_instance, "A");
    assert_eq!(links[0].dst_instance, "B");
    assert_eq!(links[0].dst_port, consumed.port);

    let document = topology.render(Format::Xml, ctx.resolver()).unwrap();
    let link_lines: Vec<_> = document.lines().filter(|l| l.contains("<link>")).collect();
    assert_eq!(link_lines.len(), 1);
    assert!(link_lines[0].contains(">A</from>"));
    assert!(link_lines[0].contains(">B</to>"));
    assert!(!document.contains(">C</to>"));
}

#[test]
fn test_input_capacity_and_unbounded_ports() {
    let ctx = context();
    let mut topology = ctx.new_topology("fanout").unwrap();
    let bus = ctx.species("Bus").unwrap();
    let sink = ctx.species("Sink").unwrap();

    let hub = topology.add_instance(&bus, Some("hub")).unwrap();
    let other = topology.add_instance(&bus, Some("other")).unwrap();
    let leaf = topology.add_instance(&sink, Some("leaf")).unwrap();

    for _ in 0..16 {
        topology.connect(hub, other).unwrap();
    }
    assert_eq!(topology.instance(hub).bound_output_count(), 16);
    assert_eq!(topology.instance(other).consumed_input_count(), 16);

    topology.connect(hub, leaf).unwrap();
    assert!(matches!(
        topology.connect(other, leaf),
        Err(PlatformError::PortCapacityExceeded {
            direction: PortDirection::Input,
            limit: 1,
            ..
        })
    ));
}

#[test]
fn test_link_count_matches_bound_outputs() {
    let ctx = context();
    let mut topology = ctx.new_topology("mesh").unwrap();
    let bus = ctx.species("Bus").unwrap();

    let nodes: Vec<_> = (0..4)
        .map(|_| topology.add_instance(&bus, None).unwrap())
        .collect();
    for (i, &src) in nodes.iter().enumerate() {
        for &dst in nodes.iter().skip(i + 1) {
            topology.connect(src, dst).unwrap();
        }
    }
    topology
        .path(nodes[3])
        .to(nodes[0])
        .unwrap()
        .to(nodes[1])
        .unwrap();

    let bound: usize = topology.instances().map(|i| i.bound_output_count()).sum();
    let links = topology.links();
    assert_eq!(bound, links.len());

    let sources: HashSet<_> = links
        .iter()
        .map(|l| (l.src_instance.clone(), l.src_port.clone()))
        .collect();
    assert_eq!(sources.len(), links.len());
}

#[test]
fn test_override_wins_over_formula() {
    let mut ctx = context();
    ctx.resolver_mut()
        .register("Sink", "latency", |_| Ok(AttrValue::Int(1)));

    let mut topology = ctx.new_topology("T").unwrap();
    let sink = ctx.species("Sink").unwrap();
    let id = topology.add_instance(&sink, Some("s")).unwrap();

    let resolve = |topology: &platsim::Topology| {
        ctx.resolver()
            .resolve(topology.instance(id), topology.params(), "latency")
            .unwrap()
    };
    assert_eq!(resolve(&topology), AttrValue::Int(1));

    topology.set_attr(id, "latency", 2).unwrap();
    assert_eq!(resolve(&topology), AttrValue::Int(2));
}

#[test]
fn test_same_topology_renders_identically() {
    let ctx = context();
    let build = || {
        let mut topology = ctx.new_topology("T").unwrap();
        let source = ctx.species("Source").unwrap();
        let sink = ctx.species("Sink").unwrap();
        let a = topology.add_instance(&source, Some("A")).unwrap();
        let b = topology.add_instance(&sink, Some("B")).unwrap();
        topology.set_attr(a, "period", TimeQuantity::ns(2) * 5).unwrap();
        topology.set_attr(b, "latency", 7).unwrap();
        topology.connect(a, b).unwrap();
        topology.add_param(Param::new("quantum").with_value(TimeQuantity::us(1)));
        topology
    };

    let first = build().render(Format::Xml, ctx.resolver()).unwrap();
    let second = build().render(Format::Xml, ctx.resolver()).unwrap();
    assert_eq!(first, second);
    assert!(first.contains("<period>10000</period>"));
    assert!(first.contains("<quantum>1000000</quantum>"));
}

#[test]
fn test_registered_species_is_shared_across_topologies() {
    let mut schema = SchemaRegistry::new();
    let cpu = schema
        .register(Species::new(
            "Cpu",
            vec![AttributeSpec::optional("secure", "0")],
            PortLimit::Bounded(0),
            PortLimit::Bounded(2),
        ))
        .unwrap();
    let ctx = SimContext::new(EngineConfig::new("/opt/vpsim/bin/vpsim"), schema).unwrap();

    let mut first = ctx.new_topology("first").unwrap();
    let mut second = ctx.new_topology("second").unwrap();
    let a = first.add_instance(&cpu, None).unwrap();
    let b = second.add_instance(&cpu, None).unwrap();

    assert_eq!(first.instance(a).name(), "Cpu0");
    assert_eq!(second.instance(b).name(), "Cpu1");
    assert!(second.instance(b).domain() > first.instance(a).domain());
}
