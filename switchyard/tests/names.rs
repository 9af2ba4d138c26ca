//! Name databases: scope precedence through compound elements.

use switchyard::elements::AddressInfo;
use switchyard::master::Master;
use switchyard::nameinfo::{EtherAddress, IpPrefix, TcpPort};
use switchyard::report::{ErrorHandler, Landmark, SilentErrorHandler};
use switchyard::router::Router;

#[test]
fn deeper_scopes_shadow_shallower_ones() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let lm = Landmark::new("names.sy", 1);

    let mut router = Router::new(&master);
    router
        .add_element(Box::new(AddressInfo::default()), "info", "LAN 10.0.0.0/24", lm.clone())
        .unwrap();
    router
        .add_element(Box::new(AddressInfo::default()), "c/info", "LAN 192.168.1.0/24", lm.clone())
        .unwrap();
    router.initialize(&mut errh).unwrap();

    // From inside compound c, the deeper definition wins.
    let deep: IpPrefix = router.name_info().query_value("c/d", "LAN").unwrap();
    assert_eq!(deep.to_string(), "192.168.1.0/24");
    // From outside, the root definition applies.
    let shallow: IpPrefix = router.name_info().query_value("e", "LAN").unwrap();
    assert_eq!(shallow.to_string(), "10.0.0.0/24");
    // Deeply nested elements under c see c's definition.
    let nested: IpPrefix = router.name_info().query_value("c/x/y", "LAN").unwrap();
    assert_eq!(nested.to_string(), "192.168.1.0/24");
}

#[test]
fn address_kinds_are_inferred() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let lm = Landmark::new("names.sy", 1);

    let mut router = Router::new(&master);
    router
        .add_element(
            Box::new(AddressInfo::default()),
            "info",
            "gw 10.0.0.1, eth0 00:1a:2b:3c:4d:5e, LAN 10.0.0.0/24",
            lm,
        )
        .unwrap();
    router.initialize(&mut errh).unwrap();

    let gw: std::net::Ipv4Addr = router.name_info().query_value("x", "gw").unwrap();
    assert_eq!(gw, std::net::Ipv4Addr::new(10, 0, 0, 1));
    let mac: EtherAddress = router.name_info().query_value("x", "eth0").unwrap();
    assert_eq!(mac.to_string(), "00:1a:2b:3c:4d:5e");
    // A prefix definition also defines the bare address.
    let lan_addr: std::net::Ipv4Addr = router.name_info().query_value("x", "LAN").unwrap();
    assert_eq!(lan_addr, std::net::Ipv4Addr::new(10, 0, 0, 0));
}

#[test]
fn bad_addresses_fail_configuration() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let lm = Landmark::new("names.sy", 1);

    let mut router = Router::new(&master);
    router
        .add_element(Box::new(AddressInfo::default()), "info", "gw not-an-address", lm)
        .unwrap();
    assert!(router.initialize(&mut errh).is_err());
    assert!(errh.nerrors() > 0);
}

#[test]
fn master_carries_global_service_fallback() {
    let master = Master::new(1);
    let http: TcpPort = master
        .global_name_info()
        .lock()
        .query_value("any/element", "http")
        .unwrap();
    assert_eq!(http.0, 80);
}
