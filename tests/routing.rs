//! Every builder function's output must parse back to the matching
//! `RoutingKey` variant — the wire-interoperability contract the hub and
//! every client depend on.

use samcore::RoutingKey;
use samcore::routing::{
    green_light_key, hub_api_key, message_key, node_api_key, node_init_key, node_return_key, return_key, send_key,
};

#[test]
fn every_builder_round_trips_through_parse() {
    assert_eq!(RoutingKey::parse(&node_init_key("samcore")), RoutingKey::NodeInit { target: "samcore".into() });
    assert_eq!(RoutingKey::parse(&green_light_key("samcore")), RoutingKey::GreenLight { target: "samcore".into() });
    assert_eq!(RoutingKey::parse(&send_key("samcore")), RoutingKey::Send { target: "samcore".into() });
    assert_eq!(RoutingKey::parse(&return_key("samcore")), RoutingKey::Return { target: "samcore".into() });
    assert_eq!(RoutingKey::parse(&message_key("alice")), RoutingKey::Message { target: "alice".into() });
    assert_eq!(
        RoutingKey::parse(&hub_api_key("samcore", "helloWorld")),
        RoutingKey::Api { target: "samcore".into(), api_call: "helloWorld".into() }
    );
    assert_eq!(
        RoutingKey::parse(&node_api_key("bob", "slow")),
        RoutingKey::Api { target: "bob".into(), api_call: "slow".into() }
    );
    assert_eq!(
        RoutingKey::parse(&node_return_key("bob", "slow", "alice", 42)),
        RoutingKey::NodeReturn {
            receiver: "bob".into(),
            api_call: "slow".into(),
            sender: "alice".into(),
            return_code: 42,
        }
    );
}

#[test]
fn a_single_segment_key_is_malformed() {
    assert!(matches!(RoutingKey::parse("samcore"), RoutingKey::Malformed(_)));
}

#[test]
fn an_empty_key_is_malformed() {
    assert!(matches!(RoutingKey::parse(""), RoutingKey::Malformed(_)));
}
