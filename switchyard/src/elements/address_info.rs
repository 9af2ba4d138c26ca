//! Address definitions for the name databases.

use std::any::Any;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::config::args::Args;
use crate::element::{configure_phase, Element, ElementError};
use crate::nameinfo::{EtherAddress, Ip6Prefix, IpPrefix};
use crate::router::InitContext;

/// Defines named addresses at configure time.
///
/// Each argument is a name followed by addresses: `gw 10.0.0.1`,
/// `LAN 10.0.0.0/24`, `eth0 00:1a:2b:3c:4d:5e`. The address kind is
/// inferred from its spelling, and each definition lands in this element's
/// compound scope, shadowing shallower scopes. Runs in the Info configure
/// phase, before ordinary elements parse their configurations.
#[derive(Default)]
pub struct AddressInfo;

fn define_one(cx: &mut InitContext<'_>, name: &str, value: &str) -> Result<(), String> {
    if value.contains('/') {
        if let Ok(prefix) = value.parse::<IpPrefix>() {
            cx.define_name(name, &prefix);
            cx.define_name(name, &prefix.addr);
            return Ok(());
        }
        if let Ok(prefix) = value.parse::<Ip6Prefix>() {
            cx.define_name(name, &prefix);
            cx.define_name(name, &prefix.addr);
            return Ok(());
        }
    }
    if let Ok(addr) = value.parse::<Ipv4Addr>() {
        cx.define_name(name, &addr);
        return Ok(());
    }
    if let Ok(ether) = value.parse::<EtherAddress>() {
        cx.define_name(name, &ether);
        return Ok(());
    }
    if let Ok(addr6) = value.parse::<Ipv6Addr>() {
        cx.define_name(name, &addr6);
        return Ok(());
    }
    Err(format!("unparsable address {:?}", value))
}

impl Element for AddressInfo {
    fn class_name(&self) -> &'static str {
        "AddressInfo"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn configure_phase(&self) -> i32 {
        configure_phase::INFO
    }

    fn configure(&mut self, mut args: Args, cx: &mut InitContext<'_>) -> Result<(), ElementError> {
        let mut errors = Vec::new();
        for item in args.take_rest() {
            let mut words = item.split_whitespace();
            let Some(name) = words.next() else { continue };
            let mut any = false;
            for value in words {
                any = true;
                if let Err(e) = define_one(cx, name, value) {
                    errors.push(format!("{}: {}", name, e));
                }
            }
            if !any {
                errors.push(format!("{}: expected an address", name));
            }
        }
        args.complete()?;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ElementError::config(errors.join("; ")))
        }
    }
}
