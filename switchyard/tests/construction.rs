//! The construction interface: event streams, registries, archives,
//! name lookup scoping.

use switchyard::config::archive::{self, ArchiveMember};
use switchyard::config::{build_router, ConfigEvent, ElementRegistry};
use switchyard::elements::{standard_registry, Counter};
use switchyard::master::Master;
use switchyard::report::{BufferErrorHandler, ErrorHandler, Landmark, SilentErrorHandler};
use switchyard::router::Router;

fn lm(line: u32) -> Landmark {
    Landmark::new("construct.sy", line)
}

fn pipeline_events() -> Vec<ConfigEvent> {
    vec![
        ConfigEvent::Element {
            name: "src".into(),
            class: "InfiniteSource".into(),
            config: "LIMIT 3".into(),
            landmark: lm(1),
        },
        ConfigEvent::Element {
            name: "q".into(),
            class: "Queue".into(),
            config: "CAPACITY 8".into(),
            landmark: lm(2),
        },
        ConfigEvent::Element {
            name: "sink".into(),
            class: "Discard".into(),
            config: "".into(),
            landmark: lm(3),
        },
        ConfigEvent::Connection {
            from: "src".into(),
            from_port: 0,
            to: "q".into(),
            to_port: 0,
            landmark: lm(4),
        },
        ConfigEvent::Connection {
            from: "q".into(),
            from_port: 0,
            to: "sink".into(),
            to_port: 0,
            landmark: lm(5),
        },
        ConfigEvent::Requirement {
            kind: "package".into(),
            value: "standard".into(),
        },
    ]
}

#[test]
fn event_stream_builds_a_working_router() {
    let master = Master::new(1);
    let registry = standard_registry();
    let mut errh = SilentErrorHandler::new();

    let mut router = build_router(&master, &registry, pipeline_events(), &mut errh).unwrap();
    router.initialize(&mut errh).unwrap();
    let router = master.activate_router(router).unwrap();

    let thread = master.thread(0).unwrap();
    for _ in 0..100 {
        thread.step(&master);
    }
    let sink = router.element_by_name("sink").unwrap();
    assert_eq!(router.call_read(sink, "count").unwrap(), "3");
    assert_eq!(router.requirements(), &[("package".to_owned(), "standard".to_owned())]);
}

#[test]
fn unknown_classes_and_names_are_reported_with_landmarks() {
    let master = Master::new(1);
    let registry = standard_registry();
    let mut errh = BufferErrorHandler::new();

    let events = vec![
        ConfigEvent::Element {
            name: "x".into(),
            class: "NoSuchClass".into(),
            config: "".into(),
            landmark: lm(7),
        },
        ConfigEvent::Connection {
            from: "x".into(),
            from_port: 0,
            to: "ghost".into(),
            to_port: 0,
            landmark: lm(8),
        },
    ];
    assert!(build_router(&master, &registry, events, &mut errh).is_err());
    assert!(errh.mentions("NoSuchClass"));
    assert!(errh.mentions("no element named"));
    assert_eq!(errh.diagnostics()[0].landmark.as_ref().unwrap().line(), 7);
    assert_eq!(errh.diagnostics()[1].landmark.as_ref().unwrap().line(), 8);
}

#[test]
fn registries_list_their_classes() {
    let registry = standard_registry();
    let classes = registry.classes();
    for class in ["AddressInfo", "Counter", "Discard", "InfiniteSource", "Queue", "Tee"] {
        assert!(classes.contains(&class), "missing {}", class);
    }
    assert!(registry.create("Queue").is_some());
    assert!(registry.create("RED").is_none());
}

#[test]
fn custom_elements_register_alongside_standard_ones() {
    let mut registry = ElementRegistry::new();
    registry.register_default::<Counter>("MyCounter");
    let element = registry.create("MyCounter").unwrap();
    assert_eq!(element.class_name(), "Counter");
}

#[test]
fn archives_carry_the_config_member() {
    let config_text = b"src :: InfiniteSource(LIMIT 3);\n".to_vec();
    let members = vec![
        ArchiveMember::new("config", config_text.clone()),
        ArchiveMember::new("standard.uo", b"\x7fELF".to_vec()),
    ];
    let bytes = archive::unparse(&members);
    let parsed = archive::parse(&bytes).unwrap();
    assert_eq!(archive::find_config(&parsed).unwrap().data, config_text);
    assert!(archive::find(&parsed, "standard.uo").is_some());
    assert!(archive::find(&parsed, "absent").is_none());
}

#[test]
fn find_element_walks_compound_scopes() {
    let master = Master::new(1);
    let mut router = Router::new(&master);
    let lm = Landmark::new("construct.sy", 1);
    let outer = router
        .add_element(Box::new(Counter::default()), "c", "", lm.clone())
        .unwrap();
    let inner = router
        .add_element(Box::new(Counter::default()), "compound/c", "", lm.clone())
        .unwrap();
    let deeper = router
        .add_element(Box::new(Counter::default()), "compound/nested/c", "", lm)
        .unwrap();

    // Lookup climbs from the asking element's scope to the global scope.
    assert_eq!(router.find_element("c", "compound/nested/other"), Some(deeper));
    assert_eq!(router.find_element("c", "compound/other"), Some(inner));
    assert_eq!(router.find_element("c", "other"), Some(outer));
    assert_eq!(router.find_element("missing", "compound/other"), None);
}
