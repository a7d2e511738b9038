use anyhow::Result;
use ice::{
    default_priority, pair_priority, Agent, AgentConfig, Candidate, CandidateKind, Transport,
};

#[test]
fn foundations_follow_type_transport_and_base_ip() {
    let agent = Agent::new(AgentConfig::default());

    let a = agent.add_local(Candidate::host("10.0.0.1:1000".parse().unwrap(), Transport::Udp));
    let b = agent.add_local(Candidate::host("10.0.0.1:2000".parse().unwrap(), Transport::Udp));
    let c = agent.add_local(Candidate::host("10.0.0.1:3000".parse().unwrap(), Transport::Tcp));
    let d = agent.add_local(Candidate::host("10.0.0.2:1000".parse().unwrap(), Transport::Udp));

    // same path, same foundation; a different transport or base IP is
    // a different path.
    assert_eq!(a.foundation, b.foundation);
    assert_ne!(a.foundation, c.foundation);
    assert_ne!(a.foundation, d.foundation);

    // reflexive candidates based on (a) share neither with their base.
    let reflexive =
        agent.add_server_reflexive("192.0.2.1:32853".parse().unwrap(), a.addr);
    assert_ne!(reflexive.foundation, a.foundation);

    let again =
        agent.add_server_reflexive("192.0.2.1:32854".parse().unwrap(), b.addr);
    assert_eq!(reflexive.foundation, again.foundation);
}

#[test]
fn indices_and_components_are_assigned() {
    let agent = Agent::new(AgentConfig::default());

    let a = agent.add_local(Candidate::host("10.0.0.1:1000".parse().unwrap(), Transport::Udp));
    let b = agent.add_local(Candidate::host("10.0.0.1:2000".parse().unwrap(), Transport::Udp));

    assert_eq!(a.index, 0);
    assert_eq!(b.index, 1);
    assert_eq!(a.component, 1);
}

#[test]
fn default_priority_formula() {
    let agent = Agent::new(AgentConfig::default());
    let host = agent.add_local(Candidate::host("10.0.0.1:1000".parse().unwrap(), Transport::Udp));

    // host/UDP, index 0, component 1.
    assert_eq!(host.priority, (126 << 24) | (7 << 13) << 8 | 255);
    assert_eq!(host.priority, default_priority(&host));

    let relay = agent.add_local(Candidate {
        kind: CandidateKind::Relay,
        base: Some("10.0.0.1:1000".parse().unwrap()),
        ..Candidate::host("198.51.100.9:40000".parse().unwrap(), Transport::Udp)
    });

    // relays sink to the bottom of the pecking order.
    assert!(relay.priority < host.priority);
}

#[test]
fn pair_priority_prefers_the_controlling_tiebreak() {
    assert_eq!(pair_priority(2, 1), (1u64 << 32) + 2 * 2 + 1);
    assert_eq!(pair_priority(1, 2), (1u64 << 32) + 2 * 2);
    assert!(pair_priority(2, 1) > pair_priority(1, 2));
}

#[test]
fn custom_priority_override() {
    let agent = Agent::new(AgentConfig {
        get_priority: Some(Box::new(|_| 42)),
        controlling: true,
    });

    let host = agent.add_local(Candidate::host("10.0.0.1:1000".parse().unwrap(), Transport::Udp));
    assert_eq!(host.priority, 42);
}

#[test]
fn sdp_round_trip_preserves_unknown_params() -> Result<()> {
    let value = "candidate:3 2 TCP 1694498815 192.0.2.3 45664 typ relay \
                 raddr 10.0.1.1 rport 8998 generation 0 network-id 2";

    let candidate: Candidate = value.parse()?;
    assert_eq!(candidate.kind, CandidateKind::Relay);
    assert_eq!(candidate.component, 2);
    assert_eq!(
        candidate.params,
        vec![
            ("generation".to_owned(), "0".to_owned()),
            ("network-id".to_owned(), "2".to_owned()),
        ]
    );

    assert_eq!(candidate.to_string(), value);
    Ok(())
}

#[tokio::test]
async fn gather_binds_and_records_host_candidates() -> Result<()> {
    let agent = Agent::new(AgentConfig::default());
    let candidate = agent.gather_udp("127.0.0.1".parse()?).await?;

    assert_eq!(candidate.kind, CandidateKind::Host);
    assert_eq!(candidate.addr.ip(), "127.0.0.1".parse::<std::net::IpAddr>()?);
    assert_ne!(candidate.addr.port(), 0);
    assert_eq!(agent.local_candidates().len(), 1);

    agent.close();
    Ok(())
}
