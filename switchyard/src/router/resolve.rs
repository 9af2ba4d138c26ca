//! Static validation: port counts, push/pull resolution, connection legality.
//!
//! Runs before any element is configured. Port counts come from the observed
//! connections checked against each element's declaration; agnostic ports
//! take their direction from their peers, propagated across connections and
//! through agnostic elements (along flow codes) to a fixed point; finally
//! every port must be connected and every connection must join like-directed
//! ports.

use itertools::Itertools;

use crate::element::{parse_processing, PortCount, PortKind};
use crate::flow::FlowCode;
use crate::report::ErrorHandler;
use crate::sync::ElementCell;

use super::{Router, RouterCore, RouterError};

/// Materializes the canonical connection ordering: sorted by source, then
/// destination.
pub(crate) fn sort_connections(core: &mut RouterCore) {
    core.connections.sort_by_key(|c| (c.from, c.to));
}

/// Runs the three validation passes in order, stopping at the first failed
/// pass.
pub(crate) fn resolve(router: &mut Router, errh: &mut dyn ErrorHandler) -> Result<(), RouterError> {
    let cells: &[ElementCell] = &router.cells;
    let core = &mut router.core;
    resolve_port_counts(cells, core, errh)?;
    resolve_processing(cells, core, errh)?;
    check_connections(core, errh)?;
    Ok(())
}

fn resolve_port_counts(
    cells: &[ElementCell],
    core: &mut RouterCore,
    errh: &mut dyn ErrorHandler,
) -> Result<(), RouterError> {
    let n = cells.len();
    let before = errh.nerrors();

    let mut observed_in = vec![0usize; n];
    let mut observed_out = vec![0usize; n];
    for c in &core.connections {
        observed_out[c.from.0] = observed_out[c.from.0].max(c.from.1 + 1);
        observed_in[c.to.0] = observed_in[c.to.0].max(c.to.1 + 1);
    }

    core.ninputs = vec![0; n];
    core.noutputs = vec![0; n];
    for e in 0..n {
        let spec = cells[e].enter(|el| el.port_count());
        let landmark = core.landmarks[e].clone();
        let pc = match PortCount::parse(spec) {
            Ok(pc) => pc,
            Err(msg) => {
                errh.lerror(&landmark, &format!("{}: {}", core.names[e], msg));
                continue;
            }
        };
        if observed_in[e] > pc.imax {
            errh.lerror(
                &landmark,
                &format!(
                    "{}: too many input connections ({} > {})",
                    core.names[e], observed_in[e], pc.imax
                ),
            );
        }
        if observed_out[e] > pc.omax {
            errh.lerror(
                &landmark,
                &format!(
                    "{}: too many output connections ({} > {})",
                    core.names[e], observed_out[e], pc.omax
                ),
            );
        }
        core.ninputs[e] = observed_in[e].max(pc.imin);
        core.noutputs[e] = observed_out[e].max(pc.omin);
    }

    // Global port numbering for graph-walk bookkeeping.
    core.in_gport = Vec::with_capacity(n + 1);
    core.out_gport = Vec::with_capacity(n + 1);
    let (mut in_off, mut out_off) = (0, 0);
    for e in 0..n {
        core.in_gport.push(in_off);
        core.out_gport.push(out_off);
        in_off += core.ninputs[e];
        out_off += core.noutputs[e];
    }
    core.in_gport.push(in_off);
    core.out_gport.push(out_off);

    core.in_peer = core.ninputs.iter().map(|&p| vec![None; p]).collect();
    core.out_peer = core.noutputs.iter().map(|&p| vec![None; p]).collect();

    if errh.nerrors() > before {
        Err(RouterError::GraphError)
    } else {
        Ok(())
    }
}

/// Assigns a direction to an agnostic input, spreading it through the
/// element to flow-linked agnostic outputs.
fn assign_input(core: &mut RouterCore, e: usize, port: usize, kind: PortKind, changed: &mut bool) {
    if core.in_kind[e][port] != PortKind::Agnostic {
        return;
    }
    core.in_kind[e][port] = kind;
    *changed = true;
    for q in 0..core.noutputs[e] {
        if core.flow_codes[e].flows(port, q) {
            assign_output(core, e, q, kind, changed);
        }
    }
}

/// Assigns a direction to an agnostic output, spreading it through the
/// element to flow-linked agnostic inputs.
fn assign_output(core: &mut RouterCore, e: usize, port: usize, kind: PortKind, changed: &mut bool) {
    if core.out_kind[e][port] != PortKind::Agnostic {
        return;
    }
    core.out_kind[e][port] = kind;
    *changed = true;
    for i in 0..core.ninputs[e] {
        if core.flow_codes[e].flows(i, port) {
            assign_input(core, e, i, kind, changed);
        }
    }
}

fn resolve_processing(
    cells: &[ElementCell],
    core: &mut RouterCore,
    errh: &mut dyn ErrorHandler,
) -> Result<(), RouterError> {
    let n = cells.len();
    let before = errh.nerrors();

    core.in_kind = Vec::with_capacity(n);
    core.out_kind = Vec::with_capacity(n);
    core.flow_codes = Vec::with_capacity(n);
    for e in 0..n {
        let landmark = core.landmarks[e].clone();
        let spec = cells[e].enter(|el| el.processing());
        match parse_processing(spec, core.ninputs[e], core.noutputs[e]) {
            Ok((ik, ok)) => {
                core.in_kind.push(ik);
                core.out_kind.push(ok);
            }
            Err(msg) => {
                errh.lerror(&landmark, &format!("{}: {}", core.names[e], msg));
                core.in_kind.push(vec![PortKind::Agnostic; core.ninputs[e]]);
                core.out_kind.push(vec![PortKind::Agnostic; core.noutputs[e]]);
            }
        }
        let code = cells[e].enter(|el| el.flow_code());
        core.flow_codes.push(FlowCode::parse_or_complete(
            code,
            core.ninputs[e],
            core.noutputs[e],
            &landmark,
            errh,
        ));
    }
    if errh.nerrors() > before {
        return Err(RouterError::GraphError);
    }

    // Agnostic ports take their direction from their peers; spread across
    // connections, and through agnostic elements along flow codes, until
    // nothing changes.
    let mut changed = true;
    while changed {
        changed = false;
        for ci in 0..core.connections.len() {
            let (from, to) = {
                let c = &core.connections[ci];
                (c.from, c.to)
            };
            let out_kind = core.out_kind[from.0][from.1];
            let in_kind = core.in_kind[to.0][to.1];
            match (out_kind, in_kind) {
                (PortKind::Agnostic, PortKind::Push | PortKind::Pull) => {
                    assign_output(core, from.0, from.1, in_kind, &mut changed);
                }
                (PortKind::Push | PortKind::Pull, PortKind::Agnostic) => {
                    assign_input(core, to.0, to.1, out_kind, &mut changed);
                }
                _ => {}
            }
        }
    }

    for e in 0..n {
        for p in 0..core.ninputs[e] {
            if core.in_kind[e][p] == PortKind::Agnostic {
                errh.lerror(
                    &core.landmarks[e].clone(),
                    &format!("{}: unresolved agnostic input port {}", core.names[e], p),
                );
            }
        }
        for p in 0..core.noutputs[e] {
            if core.out_kind[e][p] == PortKind::Agnostic {
                errh.lerror(
                    &core.landmarks[e].clone(),
                    &format!("{}: unresolved agnostic output port {}", core.names[e], p),
                );
            }
        }
    }

    if errh.nerrors() > before {
        Err(RouterError::GraphError)
    } else {
        Ok(())
    }
}

fn check_connections(core: &mut RouterCore, errh: &mut dyn ErrorHandler) -> Result<(), RouterError> {
    let n = core.ninputs.len();
    let before = errh.nerrors();

    let out_conns = core
        .connections
        .iter()
        .map(|c| (c.from, c.to))
        .into_group_map();
    let in_conns = core
        .connections
        .iter()
        .map(|c| (c.to, c.from))
        .into_group_map();

    for e in 0..n {
        let landmark = core.landmarks[e].clone();
        for p in 0..core.ninputs[e] {
            let peers = in_conns.get(&(e, p)).map(Vec::as_slice).unwrap_or(&[]);
            match peers {
                [] => errh.lerror(
                    &landmark,
                    &format!("{}: input port {} not connected", core.names[e], p),
                ),
                [peer] => core.in_peer[e][p] = Some(*peer),
                [peer, ..] => {
                    if core.in_kind[e][p] == PortKind::Pull {
                        errh.lerror(
                            &landmark,
                            &format!(
                                "{}: pull input port {} connected {} times",
                                core.names[e],
                                p,
                                peers.len()
                            ),
                        );
                    }
                    core.in_peer[e][p] = Some(*peer);
                }
            }
        }
        for p in 0..core.noutputs[e] {
            let peers = out_conns.get(&(e, p)).map(Vec::as_slice).unwrap_or(&[]);
            match peers {
                [] => errh.lerror(
                    &landmark,
                    &format!("{}: output port {} not connected", core.names[e], p),
                ),
                [peer] => core.out_peer[e][p] = Some(*peer),
                [peer, ..] => {
                    if core.out_kind[e][p] == PortKind::Push {
                        errh.lerror(
                            &landmark,
                            &format!(
                                "{}: push output port {} connected {} times",
                                core.names[e],
                                p,
                                peers.len()
                            ),
                        );
                    }
                    core.out_peer[e][p] = Some(*peer);
                }
            }
        }
    }

    // Every connection joins like-directed ports.
    for c in &core.connections {
        let out_kind = core.out_kind[c.from.0][c.from.1];
        let in_kind = core.in_kind[c.to.0][c.to.1];
        if out_kind != in_kind {
            let describe = |k: PortKind| match k {
                PortKind::Push => "push",
                PortKind::Pull => "pull",
                PortKind::Agnostic => "agnostic",
            };
            errh.lerror(
                &c.landmark,
                &format!(
                    "{} output connected to {} input: {} [{}] -> [{}] {}",
                    describe(out_kind),
                    describe(in_kind),
                    core.names[c.from.0],
                    c.from.1,
                    c.to.1,
                    core.names[c.to.0]
                ),
            );
        }
    }

    if errh.nerrors() > before {
        Err(RouterError::GraphError)
    } else {
        Ok(())
    }
}
