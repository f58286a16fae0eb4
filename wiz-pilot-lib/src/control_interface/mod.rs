use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{Installation, ParameterSet};
use crate::error::TransportError;
use crate::resolver::EffectiveParameters;
use crate::util::discovery::ResolvedDevice;
use crate::util::traits::{Transport, UdpTransport};

pub mod codec;

use codec::{decode, encode, Command, Failure, Outcome, CONTROL_PORT};

/// How long to wait for a reply before a device counts as failed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// The result of sending one command to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub device: ResolvedDevice,
    /// Present for `setPilot`; `None` for state changes.
    pub effective: Option<EffectiveParameters>,
    pub outcome: Outcome,
}

/// Sends commands to resolved devices, one bounded attempt each.
///
/// Devices in the installation's skip set are left out of the results
/// entirely. Every other device produces exactly one [`DispatchResult`], in
/// input order, whatever happened to the devices before it.
pub struct Dispatcher<'a, T: Transport = UdpTransport> {
    installation: &'a Installation,
    transport: T,
    port: u16,
    timeout: Duration,
    max_in_flight: usize,
}

impl<'a> Dispatcher<'a, UdpTransport> {
    pub fn new(installation: &'a Installation) -> Self {
        Self::with_transport(installation, UdpTransport::default())
    }
}

impl<'a, T: Transport> Dispatcher<'a, T> {
    pub fn with_transport(installation: &'a Installation, transport: T) -> Self {
        Dispatcher {
            installation,
            transport,
            port: CONTROL_PORT,
            timeout: DEFAULT_TIMEOUT,
            max_in_flight: 1,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of devices contacted at once. One means strictly sequential.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Sends each device its resolved `setPilot` parameters.
    pub async fn dispatch_all(&self, devices: &[ResolvedDevice]) -> Vec<DispatchResult> {
        let resolver = &self.installation.resolver;
        self.dispatch_with(devices, |device| {
            let effective = resolver.resolve(&device.identifier);
            (Command::SetPilot(effective.params), Some(effective))
        })
        .await
    }

    /// Switches every device on or off.
    pub async fn dispatch_state(&self, devices: &[ResolvedDevice], on: bool) -> Vec<DispatchResult> {
        self.dispatch_with(devices, |_| (Command::SetState(on), None))
            .await
    }

    /// Sends one explicit parameter set to one device.
    ///
    /// Returns `None` without sending anything when the device is in the skip
    /// set.
    pub async fn dispatch_params(
        &self,
        device: &ResolvedDevice,
        params: ParameterSet,
    ) -> Option<DispatchResult> {
        if self.installation.is_skipped(&device.identifier) {
            debug!("Skipping {}", device.display_name);
            return None;
        }
        let effective = EffectiveParameters {
            params,
            ..Default::default()
        };
        let outcome = self.send(device, &Command::SetPilot(params)).await;
        Some(DispatchResult {
            device: device.clone(),
            effective: Some(effective),
            outcome,
        })
    }

    async fn dispatch_with<F>(&self, devices: &[ResolvedDevice], plan: F) -> Vec<DispatchResult>
    where
        F: Fn(&ResolvedDevice) -> (Command, Option<EffectiveParameters>),
    {
        let targets: Vec<&ResolvedDevice> = devices
            .iter()
            .filter(|device| {
                let skipped = self.installation.is_skipped(&device.identifier);
                if skipped {
                    debug!("Skipping {}", device.display_name);
                }
                !skipped
            })
            .collect();
        info!(
            "Dispatching to {} devices ({} at a time)",
            targets.len(),
            self.max_in_flight
        );

        let results: Vec<DispatchResult> = stream::iter(targets)
            .map(|device| {
                let (command, effective) = plan(device);
                async move {
                    let outcome = self.send(device, &command).await;
                    DispatchResult {
                        device: device.clone(),
                        effective,
                        outcome,
                    }
                }
            })
            .buffered(self.max_in_flight)
            .collect()
            .await;

        let succeeded = results.iter().filter(|r| r.outcome.is_success()).count();
        info!("{} of {} devices acknowledged", succeeded, results.len());
        results
    }

    async fn send(&self, device: &ResolvedDevice, command: &Command) -> Outcome {
        let target = SocketAddr::V4(SocketAddrV4::new(device.address, self.port));
        let payload = encode(command);
        debug!("{} <- {}", device.display_name, String::from_utf8_lossy(&payload));

        let outcome = match self.transport.exchange(target, &payload, self.timeout).await {
            Ok(reply) => decode(&reply),
            Err(TransportError::Timeout(_)) => Outcome::Failure(Failure::Timeout),
            Err(e) => Outcome::Failure(Failure::Transport(e.to_string())),
        };
        if let Outcome::Failure(reason) = &outcome {
            warn!("{} ({}): {}", device.display_name, device.address, reason);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Mutex;

    use tokio::net::UdpSocket;

    use super::*;
    use crate::config::Configuration;
    use crate::identity::Group;
    use crate::util::discovery::DiscoveryPass;

    const CONFIG: &str = r#"
defaults: { r: 255, g: 70, b: 10, dimming: 60 }
devices:
  - { mac: cc40853d9142, name: FACES, group: accent }
  - { mac: cc4085840e8a, name: HORSE, group: accent }
  - { mac: cc40855a796e, name: ALIEN, group: overhead }
  - { mac: cc40855a7e7c, name: TV_0, group: overhead }
overrides:
  - scope: { group: accent }
    enabled: true
    params: { g: 30 }
  - scope: { device: cc40853d9142 }
    enabled: true
    params: { dimming: 10 }
skip: [TV_0]
"#;

    const ARP: &str = "\
? (10.0.0.1) at cc:40:85:3d:91:42 on en0
? (10.0.0.2) at cc:40:85:84:e:8a on en0
? (10.0.0.3) at cc:40:85:5a:79:6e on en0
? (10.0.0.4) at cc:40:85:5a:7e:7c on en0
? (10.0.0.5) at aa:bb:cc:dd:ee:ff on en0
";

    enum Reply {
        Ack,
        Refuse,
        Silent,
        Garbage,
    }

    /// Answers from a table keyed by address and records what it was sent.
    struct ScriptedTransport {
        replies: HashMap<Ipv4Addr, Reply>,
        sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<(Ipv4Addr, Reply)>) -> Self {
            ScriptedTransport {
                replies: replies.into_iter().collect(),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for ScriptedTransport {
        async fn exchange(
            &self,
            target: SocketAddr,
            payload: &[u8],
            wait: Duration,
        ) -> Result<Vec<u8>, TransportError> {
            self.sent.lock().unwrap().push((target, payload.to_vec()));
            let ip = match target {
                SocketAddr::V4(v4) => *v4.ip(),
                SocketAddr::V6(_) => unreachable!(),
            };
            match self.replies.get(&ip) {
                Some(Reply::Ack) => Ok(br#"{"method":"setPilot","result":{"success":true}}"#.to_vec()),
                Some(Reply::Refuse) => Ok(br#"{"success":false}"#.to_vec()),
                Some(Reply::Garbage) => Ok(b"\x00\x01".to_vec()),
                Some(Reply::Silent) | None => Err(TransportError::Timeout(wait)),
            }
        }
    }

    fn setup() -> (Installation, DiscoveryPass) {
        let _ = env_logger::builder().is_test(true).try_init();
        let installation =
            Installation::new(Configuration::from_yaml(CONFIG).unwrap()).unwrap();
        let pass = DiscoveryPass::from_arp_text(ARP, &installation.registry);
        (installation, pass)
    }

    #[tokio::test]
    async fn test_dispatch_resolves_and_skips() {
        let (installation, pass) = setup();
        let transport = ScriptedTransport::new(vec![
            (Ipv4Addr::new(10, 0, 0, 1), Reply::Ack),
            (Ipv4Addr::new(10, 0, 0, 2), Reply::Refuse),
            (Ipv4Addr::new(10, 0, 0, 3), Reply::Garbage),
        ]);
        let dispatcher = Dispatcher::with_transport(&installation, transport);
        let results = dispatcher.dispatch_all(&pass.resolved).await;

        let names: Vec<&str> = results.iter().map(|r| r.device.display_name.as_str()).collect();
        assert_eq!(names, vec!["FACES", "HORSE", "ALIEN"]);

        let faces = &results[0];
        assert_eq!(faces.outcome, Outcome::Success);
        let effective = faces.effective.unwrap();
        assert_eq!(effective.params, ParameterSet::rgb(255, 30, 10).with_dimming(10));
        assert!(effective.group_override && effective.device_override);

        assert_eq!(results[1].outcome, Outcome::Failure(Failure::Rejected));
        assert_eq!(results[1].effective.unwrap().params.dimming, Some(60));
        assert!(matches!(results[2].outcome, Outcome::Failure(Failure::Malformed(_))));

        let sent = dispatcher.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].0, "10.0.0.1:38899".parse::<SocketAddr>().unwrap());
        assert_eq!(
            sent[0].1,
            br#"{"method":"setPilot","params":{"r":255,"g":30,"b":10,"dimming":10}}"#.to_vec()
        );
        // Neither the skipped TV_0 nor the unknown bulb was contacted.
        assert!(sent.iter().all(|(addr, _)| addr.ip() != Ipv4Addr::new(10, 0, 0, 4)));
        assert!(sent.iter().all(|(addr, _)| addr.ip() != Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[tokio::test]
    async fn test_timeout_does_not_stop_the_round() {
        let (installation, pass) = setup();
        let transport = ScriptedTransport::new(vec![
            (Ipv4Addr::new(10, 0, 0, 1), Reply::Silent),
            (Ipv4Addr::new(10, 0, 0, 2), Reply::Ack),
            (Ipv4Addr::new(10, 0, 0, 3), Reply::Ack),
        ]);
        let dispatcher =
            Dispatcher::with_transport(&installation, transport).with_max_in_flight(3);
        let results = dispatcher.dispatch_all(&pass.resolved).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].outcome, Outcome::Failure(Failure::Timeout));
        assert!(results[1].outcome.is_success());
        assert!(results[2].outcome.is_success());
    }

    #[tokio::test]
    async fn test_dispatch_state_and_group_filter() {
        let (installation, mut pass) = setup();
        pass.retain_group(Group::Overhead);
        let transport = ScriptedTransport::new(vec![(Ipv4Addr::new(10, 0, 0, 3), Reply::Ack)]);
        let dispatcher = Dispatcher::with_transport(&installation, transport);

        let results = dispatcher.dispatch_state(&pass.resolved, false).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].device.display_name, "ALIEN");
        assert!(results[0].effective.is_none());
        let sent = dispatcher.transport.sent.lock().unwrap();
        assert_eq!(sent[0].1, br#"{"method":"setState","params":{"state":false}}"#.to_vec());
    }

    #[tokio::test]
    async fn test_explicit_params_respect_the_skip_set() {
        let (installation, pass) = setup();
        let tv = pass
            .resolved
            .iter()
            .find(|d| d.display_name == "TV_0")
            .unwrap();
        let faces = &pass.resolved[0];
        let transport = ScriptedTransport::new(vec![
            (Ipv4Addr::new(10, 0, 0, 1), Reply::Ack),
            (Ipv4Addr::new(10, 0, 0, 4), Reply::Ack),
        ]);
        let dispatcher = Dispatcher::with_transport(&installation, transport);

        let frame = ParameterSet::default().with_dimming(59);
        assert!(dispatcher.dispatch_params(tv, frame).await.is_none());
        assert!(dispatcher.transport.sent.lock().unwrap().is_empty());

        let result = dispatcher.dispatch_params(faces, frame).await.unwrap();
        assert_eq!(result.device.display_name, "FACES");
        assert_eq!(result.effective.unwrap().params, frame);
        let sent = dispatcher.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, br#"{"method":"setPilot","params":{"dimming":59}}"#.to_vec());
    }

    #[tokio::test]
    async fn test_udp_dispatch_against_silent_and_live_devices() {
        let installation = Installation::new(
            Configuration::from_yaml(
                "devices:\n  - { mac: cc40853d9142, name: FACES, group: accent }\n",
            )
            .unwrap(),
        )
        .unwrap();

        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = device.local_addr().unwrap().port();
        let responder = tokio::spawn(async move {
            let mut buffer = [0; 512];
            // The first request goes unanswered, the second is acknowledged.
            let _ = device.recv_from(&mut buffer).await.unwrap();
            let (_, from) = device.recv_from(&mut buffer).await.unwrap();
            device.send_to(br#"{"success":true}"#, from).await.unwrap();
        });

        let faces = ResolvedDevice {
            display_name: "FACES".into(),
            identifier: "cc40853d9142".parse().unwrap(),
            group: Group::Accent,
            address: Ipv4Addr::LOCALHOST,
        };
        let dispatcher = Dispatcher::with_transport(
            &installation,
            UdpTransport {
                bind_address: Ipv4Addr::LOCALHOST,
            },
        )
        .with_port(port)
        .with_timeout(Duration::from_millis(200));

        let first = dispatcher.dispatch_all(std::slice::from_ref(&faces)).await;
        assert_eq!(first[0].outcome, Outcome::Failure(Failure::Timeout));

        let second = dispatcher
            .dispatch_params(&faces, ParameterSet::default().with_dimming(20))
            .await
            .unwrap();
        assert!(second.outcome.is_success());
        responder.await.unwrap();
    }
}
