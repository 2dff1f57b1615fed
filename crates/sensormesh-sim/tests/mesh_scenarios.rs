use sensormesh_protocol::{
    ConnectionState, LossTrigger, MessageKind, NetAddress, NodeEvent, NodeId, RequestId,
};
use sensormesh_sim::scenario::{reading_sources, NODE_COUNT_ATTRIBUTE};
use sensormesh_sim::{Dropout, HostEvent, Observation, Record, ScenarioConfig, Simulation};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();
}

fn id(n: u8) -> NodeId {
    NodeId::new(n).unwrap()
}

fn count(records: &[Record], pred: impl Fn(&Observation) -> bool) -> usize {
    records.iter().filter(|r| pred(&r.observation)).count()
}

#[test]
fn leaves_register_and_answer_polls() {
    init_logging();
    let mut sim = Simulation::new(ScenarioConfig::default().leaves(3).ticks(10)).unwrap();
    let summary = sim.run().unwrap();

    let registry = sim.registry();
    assert_eq!(registry.len(), 3);
    assert_eq!(registry[&id(1)], "temperature");
    assert_eq!(registry[&id(2)], "humidity");
    assert_eq!(registry[&id(3)], "pressure");

    // Every leaf got the coordinator's answer to its registration.
    for n in 1..=3 {
        let records = sim.records_for(id(n));
        assert!(records.iter().any(|r| r.observation
            == Observation::Host(HostEvent::Acknowledged {
                request_id: RequestId(100 + u64::from(n)),
                value: "ok".into(),
            })));
    }

    // Polled at tick 5, answered at tick 6, read back at tick 7.
    assert_eq!(summary.readings, 3);
    assert_eq!(summary.recoveries, 0);
    assert_eq!(summary.send_failures, 0);
    assert_eq!(summary.dropped, 0);

    // Replies come from the polled leaf's address, whatever the request id says.
    let sources = reading_sources(&sim.journal().records());
    assert_eq!(sources[&RequestId(100)], NetAddress(0o1));
    assert_eq!(sources[&RequestId(200)], NetAddress(0o2));
    assert_eq!(sources[&RequestId(300)], NetAddress(0o3));

    let table: Vec<(u8, String)> = summary
        .address_table
        .iter()
        .map(|e| (e.node_id.get(), e.address.clone()))
        .collect();
    assert_eq!(
        table,
        vec![
            (1, "01".to_string()),
            (2, "02".to_string()),
            (3, "03".to_string()),
        ]
    );
}

#[test]
fn leaf_reaches_coordinator_request_handler() {
    init_logging();
    let mut sim = Simulation::new(ScenarioConfig::default().leaves(3).poll_every(0)).unwrap();
    sim.start().unwrap();
    sim.step().unwrap();

    let leaf = sim.leaf_mut(id(1)).unwrap();
    let request_id = leaf.request(NODE_COUNT_ATTRIBUTE, NodeId::COORDINATOR).unwrap();
    assert_eq!(request_id, RequestId(201));

    sim.step().unwrap();
    let records = sim.records_for(id(1));
    assert!(records.iter().any(|r| r.observation
        == Observation::Host(HostEvent::Acknowledged {
            request_id,
            value: "3".into(),
        })));
}

#[test]
fn dropout_recovers_and_reregisters() {
    init_logging();
    let config = ScenarioConfig::default()
        .leaves(3)
        .ticks(14)
        .dropout(Dropout {
            node: id(2),
            at: 5,
            duration: 4,
        });
    let mut sim = Simulation::new(config).unwrap();
    let summary = sim.run().unwrap();

    let leaf = sim.records_for(id(2));
    assert_eq!(
        count(&leaf, |o| *o
            == Observation::Node(NodeEvent::ConnectionLost {
                trigger: LossTrigger::Probe
            })),
        1
    );
    // Renewal fails on ticks 5..=8 while the radio is off.
    assert_eq!(
        count(&leaf, |o| matches!(
            o,
            Observation::Node(NodeEvent::RecoveryIncomplete { .. })
        )),
        4
    );
    let recovered: Vec<u64> = leaf
        .iter()
        .filter(|r| {
            r.observation == Observation::Node(NodeEvent::Recovered { reregistered: true })
        })
        .map(|r| r.tick)
        .collect();
    assert_eq!(recovered, vec![9]);
    assert_eq!(
        sim.leaf(id(2)).unwrap().connection_state(),
        ConnectionState::Connected
    );

    // The coordinator heard leaf 2 register twice, with the same type.
    let coordinator = sim.records_for(NodeId::COORDINATOR);
    let registrations: Vec<&str> = coordinator
        .iter()
        .filter_map(|r| match &r.observation {
            Observation::Host(HostEvent::Registered {
                node_id,
                sensor_type,
            }) if *node_id == id(2) => Some(sensor_type.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(registrations, vec!["humidity", "humidity"]);

    // The poll at tick 5 could not reach leaf 2; the coordinator never recovers.
    assert_eq!(
        count(&coordinator, |o| matches!(
            o,
            Observation::Node(NodeEvent::SendFailed { .. })
        )),
        1
    );
    assert_eq!(
        count(&coordinator, |o| matches!(
            o,
            Observation::Node(NodeEvent::ConnectionLost { .. })
        )),
        0
    );

    // Two readings from the tick-5 poll, three from the tick-10 poll.
    assert_eq!(summary.readings, 5);
    assert_eq!(summary.recoveries, 1);
    assert_eq!(sim.network().address_of(id(2)), Some(NetAddress(0o2)));
}

#[test]
fn lossy_runs_are_reproducible() {
    init_logging();
    let config = ScenarioConfig::default().leaves(5).ticks(25).loss(0.3).seed(7);

    let mut first = Simulation::new(config.clone()).unwrap();
    let first_summary = first.run().unwrap();
    let mut second = Simulation::new(config).unwrap();
    let second_summary = second.run().unwrap();

    assert_eq!(first.journal().records(), second.journal().records());
    assert_eq!(first_summary, second_summary);
    assert_eq!(first_summary.ticks, 25);
}

#[test]
fn outgoing_ids_carry_sender_origin() {
    init_logging();
    let config = ScenarioConfig::default().leaves(6).ticks(30).loss(0.2).seed(3);
    let mut sim = Simulation::new(config).unwrap();
    sim.run().unwrap();

    // Every successful send from a node carries an id with that node as origin.
    for record in sim.journal().records() {
        if let Observation::Node(NodeEvent::SendSucceeded { request_id, kind, .. }) =
            record.observation
        {
            if kind == MessageKind::Response {
                continue;
            }
            assert_eq!(request_id.origin(), record.node);
        }
    }
}
