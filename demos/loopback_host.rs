//! Host a small patch over TCP and drive it from two in-process controllers
//!
//! Run with: cargo run --example loopback_host
//!
//! Optionally pass a TOML config path. Set RUST_LOG=debug to watch the
//! protocol traffic.

use std::thread::sleep;
use std::time::Duration;

use syngraph::net::tcp::{TcpAcceptor, TcpTransport};
use syngraph::{ring_output, AlgorithmKind, AudioProcessor, Controller, Host, Position, PropertyId, SynthConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SynthConfig::load(&path).unwrap_or_else(|e| {
            eprintln!("{e}, using defaults");
            SynthConfig::default()
        }),
        None => SynthConfig::default(),
    };
    println!("config: {config:?}");

    let synth = AudioProcessor::from_config(&config);
    let host = Host::new(synth.clone());

    let osc = host.add_node(AlgorithmKind::Sawtooth, Position::new(0.0, 0.0));
    let lfo = host.add_node(AlgorithmKind::Lfo, Position::new(100.0, 0.0));
    let delay = host.add_node(AlgorithmKind::TapDelay, Position::new(200.0, 0.0));
    host.wire(osc, lfo, 0).expect("lfo takes one input");
    host.wire(lfo, delay, 0).expect("delay takes one input");

    let acceptor = TcpAcceptor::bind(config.listen_addr.as_str()).expect("Failed to bind");
    let addr = acceptor.local_addr().expect("bound socket has an address");
    let serving = host.serve(acceptor).expect("Failed to start accept loop");
    println!("host listening on {addr}");

    let transport = TcpTransport::new(addr);
    let left = Controller::connect(&transport).expect("connect");
    let right = Controller::connect(&transport).expect("connect");
    sleep(Duration::from_millis(100));

    // Render into a ring buffer, as a device callback would consume it
    let (mut output, mut consumer) = ring_output(synth.clone(), &config);

    for step in 0..20 {
        left.change_param(osc, PropertyId::Frequency, 110.0 + step as f32 * 20.0);
        right.change_param(delay, PropertyId::Feedback, step as f32 / 20.0);
        output.fill();

        let mut peak = 0.0f32;
        while let Ok(sample) = consumer.pop() {
            peak = peak.max(sample.abs());
        }
        println!(
            "step {step:2}: osc {:>6.1} Hz, feedback {:.2}, peak {peak:.3}",
            right.with_mirror(|m| m.property(osc, PropertyId::Frequency).map(|p| p.value()).unwrap_or(0.0)),
            left.with_mirror(|m| m.property(delay, PropertyId::Feedback).map(|p| p.value()).unwrap_or(0.0)),
        );
        sleep(Duration::from_millis(50));
    }

    println!("{} blocks rendered", synth.blocks_processed());
    serving.stop();
    host.shutdown();
}
