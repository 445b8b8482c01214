mod common;

use std::thread;
use std::time::Duration;

use common::{wait_until, Recorder};
use pretty_assertions::assert_eq;
use syngraph::net::{memory, Command, Connection, Message, TransportKind};
use syngraph::{AlgorithmKind, AudioProcessor, Controller, Host, NodeId, Position, Property, PropertyId};

fn host_with_sine() -> (Host, NodeId) {
    let host = Host::new(AudioProcessor::new(44_100));
    let osc = host.add_node(AlgorithmKind::Sinewave, Position::default());
    (host, osc)
}

fn volume_of(controller: &Controller, node: NodeId) -> Option<f32> {
    controller.with_mirror(|m| m.property(node, PropertyId::Volume).map(Property::value))
}

#[test]
fn edit_is_relayed_to_others_but_not_echoed() {
    common::init_tracing();
    let (host, osc) = host_with_sine();
    let (transport, listener) = memory::channel();
    let _serving = host.serve(listener).unwrap();

    let a = Recorder::new(true);
    let a_conn = Connection::new(TransportKind::Memory);
    a_conn.connect(&transport, a.clone()).unwrap();
    let b = Controller::connect(&transport).unwrap();

    assert!(wait_until(|| a.count(Command::SendNodes) == 1));
    assert!(wait_until(|| volume_of(&b, osc) == Some(1.0)));

    let edit = a
        .mirror
        .lock()
        .change_param(osc, PropertyId::Volume, 0.5)
        .unwrap();
    a_conn.send(edit);

    assert!(wait_until(|| volume_of(&b, osc) == Some(0.5)));
    assert_eq!(
        host.processor().property(osc, PropertyId::Volume).unwrap().value(),
        0.5
    );

    thread::sleep(Duration::from_millis(50));
    assert_eq!(a.count(Command::ChangeParam), 0);
    assert_eq!(
        a.mirror.lock().property(osc, PropertyId::Volume).unwrap().value(),
        0.5
    );
    a_conn.close();
}

#[test]
fn half_handshaken_peer_gets_no_graph_traffic() {
    let (host, osc) = host_with_sine();
    let (transport, listener) = memory::channel();
    let _serving = host.serve(listener).unwrap();

    let silent = Recorder::new(false);
    let silent_conn = Connection::new(TransportKind::Memory);
    silent_conn.connect(&transport, silent.clone()).unwrap();
    let greeted = Controller::connect(&transport).unwrap();

    assert!(wait_until(|| silent.count(Command::SendId) == 1));
    assert!(wait_until(|| greeted.with_mirror(|m| m.nodes().len() == 1)));

    host.add_node(AlgorithmKind::Square, Position::default());
    host.set_property_value(osc, PropertyId::Volume, 0.3).unwrap();

    assert!(wait_until(|| greeted.with_mirror(|m| m.nodes().len() == 2)));
    assert!(wait_until(|| volume_of(&greeted, osc) == Some(0.3)));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(silent.commands(), vec![Command::SendId]);

    silent_conn.close();
}

#[test]
fn mirror_matches_host_snapshot() {
    let host = Host::new(AudioProcessor::new(44_100));
    let g = host.add_node(AlgorithmKind::Triangle, Position::new(10.0, 20.0));
    let fx = host.add_node(AlgorithmKind::TapDelay, Position::default());
    host.add_node(AlgorithmKind::Lfo, Position::default());
    host.wire(g, fx, 0).unwrap();
    host.set_property_value(fx, PropertyId::Feedback, 0.8).unwrap();

    let (transport, listener) = memory::channel();
    let _serving = host.serve(listener).unwrap();
    let controller = Controller::connect(&transport).unwrap();

    assert!(wait_until(|| controller.with_mirror(|m| m.nodes().len() == 3)));
    assert_eq!(controller.mirror().nodes(), &host.processor().snapshot());
    assert_eq!(controller.mirror().selected(), Some(g));
    assert!(wait_until(|| host.focus_of(controller.id()) == Some(g)));

    host.remove_node(g);
    assert!(wait_until(|| controller.with_mirror(|m| m.nodes().len() == 2)));
    assert_eq!(controller.mirror().nodes(), &host.processor().snapshot());
    // the selected node vanished; the first remaining one is picked
    assert_eq!(controller.mirror().selected(), Some(fx));
}

#[test]
fn repeated_edit_lands_once() {
    let (host, osc) = host_with_sine();
    let (transport, listener) = memory::channel();
    let _serving = host.serve(listener).unwrap();

    let a = Recorder::new(true);
    let a_conn = Connection::new(TransportKind::Memory);
    a_conn.connect(&transport, a.clone()).unwrap();
    let b = Recorder::new(true);
    let b_conn = Connection::new(TransportKind::Memory);
    b_conn.connect(&transport, b.clone()).unwrap();
    assert!(wait_until(|| a.count(Command::SendNodes) == 1 && b.count(Command::SendNodes) == 1));

    let edit = Message::change_param(osc, Property::new(PropertyId::Frequency, 220.0, 20.0, 2000.0));
    a_conn.send(edit.clone());
    a_conn.send(edit);

    assert!(wait_until(|| b.count(Command::ChangeParam) == 2));
    let after = b.mirror.lock().clone();
    assert_eq!(after.property(osc, PropertyId::Frequency).unwrap().value(), 220.0);
    assert_eq!(
        host.processor().property(osc, PropertyId::Frequency).unwrap().value(),
        220.0
    );

    a_conn.close();
    b_conn.close();
}

#[test]
fn batch_edits_and_selection_reach_the_host() {
    let (host, osc) = host_with_sine();
    let second = host.add_node(AlgorithmKind::Sawtooth, Position::default());
    let (transport, listener) = memory::channel();
    let _serving = host.serve(listener).unwrap();

    let controller = Controller::connect(&transport).unwrap();
    let watcher = Controller::connect(&transport).unwrap();
    assert!(wait_until(|| controller.with_mirror(|m| m.nodes().len() == 2)));
    assert!(wait_until(|| watcher.with_mirror(|m| m.nodes().len() == 2)));

    assert!(controller.select(second));
    assert!(wait_until(|| host.focus_of(controller.id()) == Some(second)));

    assert!(controller.change_params(osc, [(PropertyId::Volume, 0.2), (PropertyId::Pan, -0.5)]));
    assert!(wait_until(|| {
        watcher.with_mirror(|m| m.property(osc, PropertyId::Pan).map(Property::value)) == Some(-0.5)
    }));
    assert_eq!(volume_of(&watcher, osc), Some(0.2));
    assert_eq!(host.processor().property(osc, PropertyId::Pan).unwrap().value(), -0.5);
}

#[test]
fn malformed_messages_do_not_kill_the_connection() {
    let (host, osc) = host_with_sine();
    let (transport, listener) = memory::channel();
    let _serving = host.serve(listener).unwrap();

    let a = Recorder::new(true);
    let a_conn = Connection::new(TransportKind::Memory);
    a_conn.connect(&transport, a.clone()).unwrap();
    assert!(wait_until(|| a.count(Command::SendNodes) == 1));

    // missing extras, a host-only command, an edit for a node that doesn't exist
    a_conn.send(Message::new(Command::ChangeParam));
    a_conn.send(Message::new(Command::SendNodes));
    a_conn.send(Message::change_param(
        NodeId::from(999),
        Property::new(PropertyId::Volume, 0.1, 0.0, 1.0),
    ));
    a_conn.send(Message::change_param(
        osc,
        Property::new(PropertyId::Volume, 0.4, 0.0, 1.0),
    ));

    assert!(wait_until(|| {
        host.processor().property(osc, PropertyId::Volume).map(|p| p.value()) == Some(0.4)
    }));
    assert!(a_conn.is_connected());
    assert_eq!(host.connections().connected_count(), 1);
    a_conn.close();
}

#[test]
fn each_connection_gets_its_own_id_and_colour() {
    let (host, _) = host_with_sine();
    let (transport, listener) = memory::channel();
    let _serving = host.serve(listener).unwrap();

    let controllers: Vec<Controller> = (0..3)
        .map(|_| Controller::connect(&transport).unwrap())
        .collect();
    assert!(wait_until(|| controllers.iter().all(|c| c.id() != 0)));

    let mut ids: Vec<u32> = controllers.iter().map(|c| c.id()).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 3]);
    for c in &controllers {
        assert_eq!(c.mirror().color(), host.color_of(c.id()));
        assert_eq!(c.connection().id(), c.id());
    }
}
