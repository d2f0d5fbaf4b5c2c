//! Start/stop behaviour of a full server against recording fakes.

mod common;

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{
    echo_until_drained, free_loopback_address, loopback_specs, test_config, Event, EventLog, Harness, ManualExitHook,
};
use portico::lifecycle::InstanceStatus;
use portico::{ListenerSpecs, ServerError, ServerLifecycle, ServerState, TransportKind};

#[test]
fn listening_addresses_follow_the_lifecycle() {
    let specs = loopback_specs(2);
    let expected = specs.addresses();
    let harness = Harness::new(specs);

    assert!(matches!(
        harness.server.listening_addresses(),
        Err(ServerError::NotStarted)
    ));

    harness.server.start(false).unwrap();
    assert_eq!(harness.server.state(), ServerState::Running);
    assert_eq!(harness.server.listening_addresses().unwrap(), expected);

    harness.server.stop();
    assert_eq!(harness.server.state(), ServerState::Stopped);
    assert!(harness.server.listening_addresses().unwrap().is_empty());
}

#[test]
fn listeners_bound_in_order_after_status_up() {
    let specs = loopback_specs(3);
    let addresses = specs.addresses();
    let harness = Harness::new(specs);

    harness.server.start(false).unwrap();
    let events = harness.log.events();
    assert_eq!(
        events,
        vec![
            Event::Status(InstanceStatus::Up),
            Event::Bind(addresses[0]),
            Event::Bind(addresses[1]),
            Event::Bind(addresses[2]),
        ]
    );
    harness.server.stop();
}

#[test]
fn stop_sequence_order() {
    let harness = Harness::new(loopback_specs(1));
    harness.server.start(false).unwrap();
    harness.server.stop();

    let log = &harness.log;
    let down = log.position(&Event::Status(InstanceStatus::Down)).unwrap();
    let drain = log.position(&Event::Drain).unwrap();
    let unregistered = log.position(&Event::HookUnregistered).unwrap();
    assert!(down < drain);
    assert!(drain < unregistered);
}

#[test]
fn stop_twice_runs_once() {
    let harness = Harness::new(loopback_specs(1));
    harness.server.start(false).unwrap();

    harness.server.stop();
    harness.server.stop();

    assert_eq!(harness.log.count(&Event::Drain), 1);
    assert_eq!(harness.log.count(&Event::Status(InstanceStatus::Down)), 1);
    assert_eq!(harness.log.count(&Event::HookUnregistered), 1);
}

#[test]
fn concurrent_stops_run_once() {
    let harness = Arc::new(Harness::new(loopback_specs(2)));
    harness.server.start(false).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let harness = harness.clone();
            thread::spawn(move || harness.server.stop())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(harness.server.await_stopped(Duration::from_secs(10)));
    assert_eq!(harness.log.count(&Event::Drain), 1);
    assert_eq!(harness.log.count(&Event::Status(InstanceStatus::Down)), 1);
}

#[test]
fn exit_hook_and_explicit_stop_converge() {
    let harness = Arc::new(Harness::new(loopback_specs(1)));
    harness.server.start(false).unwrap();
    assert!(harness.hook.is_registered());

    let from_hook = {
        let harness = harness.clone();
        thread::spawn(move || harness.hook.trigger())
    };
    harness.server.stop();
    from_hook.join().unwrap();

    assert!(harness.server.await_stopped(Duration::from_secs(10)));
    assert_eq!(harness.log.count(&Event::Drain), 1);
    assert!(!harness.hook.is_registered());
}

#[test]
fn exit_hook_alone_stops_server() {
    let harness = Harness::new(loopback_specs(1));
    harness.server.start(false).unwrap();

    assert!(harness.hook.trigger());
    assert_eq!(harness.server.state(), ServerState::Stopped);
    assert_eq!(harness.log.count(&Event::Drain), 1);

    // Already stopped: an explicit stop has no further effect.
    harness.server.stop();
    assert_eq!(harness.log.count(&Event::Drain), 1);
}

#[test]
fn state_never_regresses() {
    let harness = Harness::new(loopback_specs(1));
    let mut seen = vec![harness.server.state()];

    harness.server.start(false).unwrap();
    seen.push(harness.server.state());
    assert!(matches!(harness.server.start(false), Err(ServerError::AlreadyStarted)));
    seen.push(harness.server.state());

    harness.server.stop();
    seen.push(harness.server.state());
    assert!(matches!(harness.server.start(false), Err(ServerError::Stopped)));
    seen.push(harness.server.state());
    harness.server.stop();
    seen.push(harness.server.state());

    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]), "{seen:?}");
    assert_eq!(seen.last(), Some(&ServerState::Stopped));
}

#[test]
fn stop_before_start_goes_straight_to_stopped() {
    let harness = Harness::new(loopback_specs(1));
    harness.server.stop();

    assert_eq!(harness.server.state(), ServerState::Stopped);
    assert_eq!(harness.log.count(&Event::Drain), 0);
    assert_eq!(harness.binder.attempts(), 0);
    assert!(harness.server.listening_addresses().unwrap().is_empty());
}

#[test]
fn port_can_be_rebound_after_stop() {
    let harness = Harness::new(loopback_specs(2));
    harness.server.start(false).unwrap();
    let addresses = harness.server.listening_addresses().unwrap();

    harness.server.stop();

    for address in addresses {
        TcpListener::bind(address).unwrap_or_else(|e| panic!("{address} still bound: {e}"));
    }
}

#[test]
fn connections_are_served_by_workers() {
    let harness = Harness::new(loopback_specs(1));
    harness.server.start(false).unwrap();
    assert_eq!(harness.server.transport(), Some(TransportKind::Portable));

    let address = harness.server.listening_addresses().unwrap()[0];
    let mut client = TcpStream::connect(address).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    // The handler drops the stream straight away, so the read sees EOF.
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).unwrap(), 0);

    assert!(harness.server.wait_for_each_event_loop());
    harness.server.stop();
}

#[test]
fn blocking_start_returns_after_stop() {
    let harness = Arc::new(Harness::new(loopback_specs(2)));

    let starter = {
        let harness = harness.clone();
        thread::spawn(move || harness.server.start(true))
    };

    while harness.server.state() != ServerState::Running {
        thread::sleep(Duration::from_millis(10));
    }
    harness.server.stop();

    starter.join().unwrap().unwrap();
    assert_eq!(harness.server.state(), ServerState::Stopped);
}

#[test]
fn blocking_start_can_be_interrupted() {
    let harness = Arc::new(Harness::new(loopback_specs(1)));

    let starter = {
        let harness = harness.clone();
        thread::spawn(move || harness.server.start(true))
    };

    while harness.server.state() != ServerState::Running {
        thread::sleep(Duration::from_millis(10));
    }
    harness.server.interrupt();

    starter.join().unwrap().unwrap();
    assert!(harness.server.is_interrupted());
    assert_eq!(harness.server.state(), ServerState::Running);
    harness.server.stop();
}

#[test]
fn manual_drain_reaches_drainer() {
    let harness = Harness::new(loopback_specs(1));
    harness.server.drain_connections();
    assert_eq!(harness.log.count(&Event::Drain), 1);
}

#[test]
fn default_drain_closes_idle_connections() {
    let specs = ListenerSpecs::new().with(free_loopback_address(), echo_until_drained);
    // Default drainer; 5s termination timeout.
    let server = ServerLifecycle::builder(test_config(), specs)
        .exit_hook(Arc::new(ManualExitHook::new(EventLog::default())))
        .build();
    server.start(false).unwrap();

    let address = server.listening_addresses().unwrap()[0];
    let mut client = TcpStream::connect(address).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(b"hi").unwrap();
    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"hi");

    let started = Instant::now();
    server.stop();
    let took = started.elapsed();

    assert_eq!(server.state(), ServerState::Stopped);
    assert!(took < Duration::from_secs(3), "stop took {took:?}");
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).unwrap(), 0);
}
