// kt-test-utils: Shared test utilities for the task server suite.
//
// Provides a minimal raw HTTP client (so tests exercise the hand-built
// parser exactly as a socket peer would) and a UDP probe that plays the
// role of a notification subscriber.

pub mod http_client;
pub mod udp_probe;

pub use http_client::{RawResponse, TEST_PASSWORD, TestRequest, register_and_login, send_raw};
pub use udp_probe::UdpProbe;
