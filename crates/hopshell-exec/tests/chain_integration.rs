use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use hopshell_exec::*;

/// Connection lifecycle as seen by the mocks
#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Opened(String),
    Tunneled { via: String, to: String },
    Closed(String),
    Dropped(String),
}

type Log = Arc<Mutex<Vec<Event>>>;

/// How a hop answers a dial
#[derive(Clone)]
enum Dial {
    Accept,
    Refuse,
    Unresolved,
    RejectPassword,
    Hang,
}

/// What a command does on the target
#[derive(Clone)]
enum Script {
    Output {
        stdout: &'static str,
        stderr: &'static str,
        status: u32,
    },
    Hang,
}

// Mock implementations
struct MockConnector {
    dial: HashMap<String, Dial>,
    scripts: Arc<HashMap<String, Script>>,
    log: Log,
}

impl MockConnector {
    fn new() -> Self {
        Self {
            dial: HashMap::new(),
            scripts: Arc::new(HashMap::new()),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_dial(mut self, host: &str, dial: Dial) -> Self {
        self.dial.insert(host.to_string(), dial);
        self
    }

    fn with_script(mut self, command: &str, script: Script) -> Self {
        Arc::get_mut(&mut self.scripts)
            .unwrap()
            .insert(command.to_string(), script);
        self
    }

    fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }

    /// Tunnelled hops fail the way a refused `direct-tcpip` open does
    async fn answer(&self, hop: &HopConfig, tunneled: bool) -> Result<MockLink, TransportError> {
        match self.dial.get(&hop.host).cloned().unwrap_or(Dial::Accept) {
            Dial::Accept => Ok(MockLink {
                host: hop.host.clone(),
                scripts: Arc::clone(&self.scripts),
                log: Arc::clone(&self.log),
                closed: false,
            }),
            Dial::Refuse if tunneled => Err(TransportError::ChannelOpen(
                "ConnectFailed (Connection refused)".to_string(),
            )),
            Dial::Refuse => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "Connection refused (os error 111)",
            ))),
            Dial::Unresolved if tunneled => Err(TransportError::ChannelOpen(
                "ConnectFailed (Name or service not known)".to_string(),
            )),
            Dial::Unresolved => Err(TransportError::Io(io::Error::other(
                "failed to lookup address information: Name or service not known",
            ))),
            Dial::RejectPassword => Err(TransportError::Auth(format!(
                "password authentication rejected for user {}",
                hop.username
            ))),
            Dial::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Link = MockLink;

    async fn connect(&self, hop: &HopConfig) -> Result<MockLink, TransportError> {
        let link = self.answer(hop, false).await?;
        self.log.lock().unwrap().push(Event::Opened(hop.host.clone()));
        Ok(link)
    }

    async fn tunnel(&self, via: &MockLink, hop: &HopConfig) -> Result<MockLink, TransportError> {
        let link = self.answer(hop, true).await?;
        let mut log = self.log.lock().unwrap();
        log.push(Event::Tunneled {
            via: via.host.clone(),
            to: hop.host.clone(),
        });
        log.push(Event::Opened(hop.host.clone()));
        Ok(link)
    }
}

struct MockLink {
    host: String,
    scripts: Arc<HashMap<String, Script>>,
    log: Log,
    closed: bool,
}

#[async_trait]
impl Link for MockLink {
    fn host(&self) -> &str {
        &self.host
    }

    async fn open_session(&self) -> Result<Box<dyn ExecChannel>, TransportError> {
        Ok(Box::new(MockChannel {
            scripts: Arc::clone(&self.scripts),
            pending: VecDeque::new(),
            hang: false,
        }))
    }

    async fn close(mut self) -> Result<(), TransportError> {
        self.closed = true;
        self.log.lock().unwrap().push(Event::Closed(self.host.clone()));
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        if !self.closed {
            self.log.lock().unwrap().push(Event::Dropped(self.host.clone()));
        }
    }
}

struct MockChannel {
    scripts: Arc<HashMap<String, Script>>,
    pending: VecDeque<ChannelEvent>,
    hang: bool,
}

#[async_trait]
impl ExecChannel for MockChannel {
    async fn exec(&mut self, command: &str) -> Result<(), TransportError> {
        match self.scripts.get(command) {
            Some(Script::Output {
                stdout,
                stderr,
                status,
            }) => {
                if !stdout.is_empty() {
                    self.pending
                        .push_back(ChannelEvent::Stdout(stdout.as_bytes().to_vec()));
                }
                if !stderr.is_empty() {
                    self.pending
                        .push_back(ChannelEvent::Stderr(stderr.as_bytes().to_vec()));
                }
                self.pending.push_back(ChannelEvent::Eof);
                self.pending.push_back(ChannelEvent::ExitStatus(*status));
                Ok(())
            }
            Some(Script::Hang) => {
                self.hang = true;
                Ok(())
            }
            None => Err(TransportError::Protocol(format!("unscripted command {command}"))),
        }
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        match self.pending.pop_front() {
            Some(event) => Some(event),
            None if self.hang => std::future::pending().await,
            None => None,
        }
    }

    async fn close(&mut self) {
        self.hang = false;
    }
}

fn hops(hosts: &[&str]) -> Vec<HopConfig> {
    hosts
        .iter()
        .map(|host| HopConfig::new(*host, "ops", "secret"))
        .collect()
}

fn commands(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

fn hello() -> Script {
    Script::Output {
        stdout: "hello\n",
        stderr: "",
        status: 0,
    }
}

#[tokio::test]
async fn test_single_hop_echo_hello() {
    let connector = MockConnector::new().with_script("echo hello", hello());
    let executor = ChainExecutor::new(connector);

    let results = executor
        .run(&hops(&["node-1"]), &commands(&["echo hello"]))
        .await
        .unwrap();

    assert_eq!(
        results,
        vec![CommandResult {
            command: "echo hello".to_string(),
            stdout: "hello\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
        }]
    );
    assert_eq!(
        executor.connector().events(),
        vec![
            Event::Opened("node-1".into()),
            Event::Closed("node-1".into())
        ]
    );
}

#[tokio::test]
async fn test_chain_tunnels_in_order_and_closes_in_reverse() {
    let connector = MockConnector::new().with_script("echo hello", hello());
    let executor = ChainExecutor::new(connector);

    executor
        .run(&hops(&["a", "b", "c"]), &commands(&["echo hello"]))
        .await
        .unwrap();

    assert_eq!(
        executor.connector().events(),
        vec![
            Event::Opened("a".into()),
            Event::Tunneled {
                via: "a".into(),
                to: "b".into()
            },
            Event::Opened("b".into()),
            Event::Tunneled {
                via: "b".into(),
                to: "c".into()
            },
            Event::Opened("c".into()),
            Event::Closed("c".into()),
            Event::Closed("b".into()),
            Event::Closed("a".into()),
        ]
    );
}

#[tokio::test]
async fn test_nonzero_exit_is_not_an_error() {
    let connector = MockConnector::new().with_script(
        "exit 3",
        Script::Output {
            stdout: "",
            stderr: "",
            status: 3,
        },
    );
    let executor = ChainExecutor::new(connector);

    let results = executor
        .run(&hops(&["node-1"]), &commands(&["exit 3"]))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].exit_code, 3);
}

#[tokio::test]
async fn test_results_keep_submission_order() {
    let connector = MockConnector::new()
        .with_script(
            "first",
            Script::Output {
                stdout: "1\n",
                stderr: "",
                status: 0,
            },
        )
        .with_script(
            "second",
            Script::Output {
                stdout: "",
                stderr: "warn\n",
                status: 1,
            },
        );
    let executor = ChainExecutor::new(connector);

    let results = executor
        .run(&hops(&["a", "b"]), &commands(&["first", "second"]))
        .await
        .unwrap();

    let order: Vec<&str> = results.iter().map(|r| r.command.as_str()).collect();
    assert_eq!(order, vec!["first", "second"]);
    assert_eq!(results[1].stderr, "warn\n");
}

#[tokio::test]
async fn test_middle_hop_refused_closes_opened_hops() {
    let connector = MockConnector::new()
        .with_dial("b", Dial::Refuse)
        .with_script("echo hello", hello());
    let executor = ChainExecutor::new(connector);

    let failure = executor
        .run(&hops(&["a", "b", "c"]), &commands(&["echo hello"]))
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::ConnectionRefused);
    assert_eq!(failure.error.host.as_deref(), Some("b"));
    assert!(failure.completed.is_empty());
    // c is never attempted
    assert_eq!(
        executor.connector().events(),
        vec![Event::Opened("a".into()), Event::Closed("a".into())]
    );
}

#[tokio::test]
async fn test_unresolved_tunneled_hop_is_host_not_found() {
    let connector = MockConnector::new().with_dial("node-9", Dial::Unresolved);
    let executor = ChainExecutor::new(connector);

    let failure = executor
        .run(&hops(&["bastion", "node-9"]), &commands(&["true"]))
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::HostNotFound);
    assert_eq!(failure.error.host.as_deref(), Some("node-9"));
    assert_eq!(
        executor.connector().events(),
        vec![Event::Opened("bastion".into()), Event::Closed("bastion".into())]
    );
}

#[tokio::test]
async fn test_unresolved_first_hop_is_host_not_found() {
    let connector = MockConnector::new().with_dial("nowhere", Dial::Unresolved);
    let executor = ChainExecutor::new(connector);

    let failure = executor
        .run(&hops(&["nowhere"]), &commands(&["true"]))
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::HostNotFound);
    assert!(executor.connector().events().is_empty());
}

#[tokio::test]
async fn test_auth_failure_on_first_hop_opens_nothing() {
    let connector = MockConnector::new().with_dial("bastion", Dial::RejectPassword);
    let executor = ChainExecutor::new(connector);

    let failure = executor
        .run(&hops(&["bastion", "node-1"]), &commands(&["true"]))
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::AuthenticationFailed);
    assert_eq!(failure.error.host.as_deref(), Some("bastion"));
    assert!(executor.connector().events().is_empty());
}

#[tokio::test]
async fn test_hanging_hop_times_out_per_hop() {
    let connector = MockConnector::new().with_dial("b", Dial::Hang);
    let executor = ChainExecutor::new(connector).with_timeout(Duration::from_millis(50));

    let failure = executor
        .run(&hops(&["a", "b"]), &commands(&["true"]))
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::ConnectionTimeout);
    assert_eq!(failure.error.host.as_deref(), Some("b"));
    assert_eq!(
        executor.connector().events(),
        vec![Event::Opened("a".into()), Event::Closed("a".into())]
    );
}

#[tokio::test]
async fn test_command_timeout_keeps_prior_results() {
    let connector = MockConnector::new()
        .with_script("echo hello", hello())
        .with_script("sleep infinity", Script::Hang);
    let executor = ChainExecutor::new(connector).with_timeout(Duration::from_millis(100));

    let failure = executor
        .run(
            &hops(&["a", "b"]),
            &commands(&["echo hello", "sleep infinity", "echo hello"]),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::ConnectionTimeout);
    assert_eq!(failure.error.command.as_deref(), Some("sleep infinity"));
    assert_eq!(failure.completed.len(), 1);
    assert_eq!(failure.completed[0].stdout, "hello\n");

    let events = executor.connector().events();
    assert_eq!(
        &events[events.len() - 2..],
        &[Event::Closed("b".into()), Event::Closed("a".into())]
    );
}

#[tokio::test]
async fn test_failed_command_start_closes_chain() {
    let connector = MockConnector::new().with_script("echo hello", hello());
    let executor = ChainExecutor::new(connector);

    let failure = executor
        .run(&hops(&["a", "b"]), &commands(&["echo hello", "unknown"]))
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::CommandExecutionFailed);
    assert_eq!(failure.completed.len(), 1);
    assert_eq!(
        executor.connector().events().last(),
        Some(&Event::Closed("a".into()))
    );
}

#[tokio::test]
async fn test_empty_inputs_are_rejected_before_dialing() {
    let executor = ChainExecutor::new(MockConnector::new());

    let failure = executor.run(&[], &commands(&["true"])).await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::ValidationError);

    let failure = executor.run(&hops(&["a"]), &[]).await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::ValidationError);

    assert!(executor.connector().events().is_empty());
}

#[tokio::test]
async fn test_dropped_chain_releases_hops_in_reverse() {
    let connector = MockConnector::new();

    let chain = dial_chain(&connector, &hops(&["a", "b", "c"]), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(chain.len(), 3);
    drop(chain);

    let dropped: Vec<Event> = connector
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Dropped(_)))
        .collect();
    assert_eq!(
        dropped,
        vec![
            Event::Dropped("c".into()),
            Event::Dropped("b".into()),
            Event::Dropped("a".into()),
        ]
    );
}

#[tokio::test]
async fn test_dial_failure_hands_back_partial_chain() {
    let connector = MockConnector::new().with_dial("c", Dial::Refuse);

    let failure = dial_chain(&connector, &hops(&["a", "b", "c"]), Duration::from_secs(1))
        .await
        .unwrap_err();

    assert_eq!(failure.partial.len(), 2);
    assert_eq!(failure.partial.hosts().collect::<Vec<_>>(), vec!["a", "b"]);
    assert_eq!(failure.error.host.as_deref(), Some("c"));
    assert_eq!(failure.error.kind, ErrorKind::ConnectionRefused);

    failure.partial.close().await;
    let events = connector.events();
    assert_eq!(
        &events[events.len() - 2..],
        &[Event::Closed("b".into()), Event::Closed("a".into())]
    );
}
