//! Quorum liveness voting
//!
//! One vote comes from a local PING, one from each monitor server. A node
//! is alive only with a strict majority: `votes > total / 2`, so an even
//! split counts as dead.

use crate::common::{encode_address, Error, Result};
use crate::coordinator::registry::Node;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Body of `GET /monitor/{address}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorResponse {
    pub redis_node_address: String,
    pub is_alive: bool,
    #[serde(default)]
    pub error_message: String,
}

/// Asks one monitor server about one node
#[async_trait]
pub trait MonitorProbe: Send + Sync {
    async fn query(&self, monitor: &str, node_address: &str) -> Result<MonitorResponse>;
}

/// Queries monitors over HTTP
pub struct HttpMonitorProbe {
    client: reqwest::Client,
}

impl HttpMonitorProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpMonitorProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MonitorProbe for HttpMonitorProbe {
    async fn query(&self, monitor: &str, node_address: &str) -> Result<MonitorResponse> {
        let url = format!("http://{}/monitor/{}", monitor, encode_address(node_address));
        // Error responses carry the same JSON body, so the status is not checked
        let response = self.client.get(&url).send().await?;
        Ok(response.json::<MonitorResponse>().await?)
    }
}

/// Outcome of one liveness vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteResult {
    pub votes: usize,
    pub total: usize,
}

impl VoteResult {
    pub fn is_alive(&self) -> bool {
        self.votes > self.total / 2
    }
}

impl std::fmt::Display for VoteResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.votes, self.total)
    }
}

enum Verdict {
    Answered(Result<MonitorResponse>),
    Expired,
}

/// Local ping plus a fixed set of monitor servers
pub struct LivenessOracle {
    monitors: Vec<String>,
    probe: Arc<dyn MonitorProbe>,
    timeout: Option<Duration>,
}

impl LivenessOracle {
    pub fn new(monitors: Vec<String>, probe: Arc<dyn MonitorProbe>, timeout: Option<Duration>) -> Self {
        Self {
            monitors,
            probe,
            timeout,
        }
    }

    pub fn monitors(&self) -> &[String] {
        &self.monitors
    }

    /// Count the votes for `node`.
    ///
    /// A monitor that errors or answers for another node makes the whole
    /// call fail with a retryable error. A monitor or local ping that
    /// misses the deadline simply withholds its vote.
    pub async fn ask_alive(&self, node: &Node) -> Result<VoteResult> {
        let total = self.monitors.len() + 1;
        let (tx, mut rx) = mpsc::channel(self.monitors.len().max(1));

        for monitor in &self.monitors {
            let tx = tx.clone();
            let probe = self.probe.clone();
            let monitor = monitor.clone();
            let address = node.address().to_string();
            let deadline = self.timeout;
            tokio::spawn(async move {
                let query = probe.query(&monitor, &address);
                let verdict = match deadline {
                    Some(d) => match tokio::time::timeout(d, query).await {
                        Ok(answer) => Verdict::Answered(answer),
                        Err(_) => Verdict::Expired,
                    },
                    None => Verdict::Answered(query.await),
                };
                let _ = tx.send((monitor, verdict)).await;
            });
        }
        drop(tx);

        let mut votes = 0;
        let ping = match self.timeout {
            Some(d) => tokio::time::timeout(d, node.ping())
                .await
                .unwrap_or_else(|_| Err(Error::Timeout(format!("local ping after {:?}", d)))),
            None => node.ping().await,
        };
        match ping {
            Ok(()) => votes += 1,
            Err(e) => tracing::debug!(node = %node.address(), error = %e, "Local ping failed"),
        }

        let mut failure = None;
        for _ in 0..self.monitors.len() {
            let Some((monitor, verdict)) = rx.recv().await else {
                return Err(Error::Internal("monitor query task vanished".into()));
            };
            match verdict {
                Verdict::Expired => {
                    tracing::warn!(monitor = %monitor, node = %node.address(), "Monitor query timed out");
                }
                Verdict::Answered(Ok(resp)) => match check_response(&monitor, node, resp) {
                    Ok(true) => votes += 1,
                    Ok(false) => {}
                    Err(e) => {
                        failure.get_or_insert(e);
                    }
                },
                Verdict::Answered(Err(e)) => {
                    failure.get_or_insert(Error::QuorumIndeterminate {
                        node: node.address().to_string(),
                        reason: format!("monitor {}: {}", monitor, e),
                    });
                }
            }
        }

        if let Some(e) = failure {
            tracing::warn!(node = %node.address(), error = %e, "Liveness vote aborted");
            return Err(e);
        }

        let result = VoteResult { votes, total };
        tracing::debug!(node = %node.address(), votes, total, "Liveness vote");
        Ok(result)
    }
}

fn check_response(monitor: &str, node: &Node, resp: MonitorResponse) -> Result<bool> {
    if !resp.error_message.is_empty() {
        return Err(Error::QuorumIndeterminate {
            node: node.address().to_string(),
            reason: format!("monitor {}: {}", monitor, resp.error_message),
        });
    }
    if resp.redis_node_address != node.address() {
        return Err(Error::MonitorMismatch {
            monitor: monitor.to_string(),
            expected: node.address().to_string(),
            actual: resp.redis_node_address,
        });
    }
    Ok(resp.is_alive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NodeRole;
    use crate::coordinator::node_client::{Connector, MemoryConnector};
    use std::collections::HashMap;

    /// Monitors with canned behaviour
    struct ScriptedProbe {
        answers: HashMap<String, Option<MonitorResponse>>,
    }

    #[async_trait]
    impl MonitorProbe for ScriptedProbe {
        async fn query(&self, monitor: &str, _node_address: &str) -> Result<MonitorResponse> {
            match self.answers.get(monitor) {
                Some(Some(resp)) => Ok(resp.clone()),
                Some(None) => std::future::pending::<Result<MonitorResponse>>().await,
                None => Err(Error::Http("connection refused".into())),
            }
        }
    }

    fn answer(address: &str, alive: bool) -> Option<MonitorResponse> {
        Some(MonitorResponse {
            redis_node_address: address.into(),
            is_alive: alive,
            error_message: String::new(),
        })
    }

    async fn node(connector: &MemoryConnector, address: &str) -> Node {
        Node::new(address, NodeRole::Primary, connector.connect(address).await.unwrap())
    }

    fn oracle(answers: Vec<(&str, Option<MonitorResponse>)>) -> LivenessOracle {
        let monitors = answers.iter().map(|(m, _)| m.to_string()).collect();
        let answers = answers.into_iter().map(|(m, a)| (m.to_string(), a)).collect();
        LivenessOracle::new(
            monitors,
            Arc::new(ScriptedProbe { answers }),
            Some(Duration::from_millis(200)),
        )
    }

    #[test]
    fn test_majority_arithmetic() {
        assert!(VoteResult { votes: 2, total: 3 }.is_alive());
        assert!(!VoteResult { votes: 1, total: 3 }.is_alive());
        assert!(!VoteResult { votes: 1, total: 2 }.is_alive());
        assert!(VoteResult { votes: 1, total: 1 }.is_alive());
        assert!(!VoteResult { votes: 0, total: 1 }.is_alive());
    }

    #[tokio::test]
    async fn test_all_votes_alive() {
        let connector = MemoryConnector::new();
        let n = node(&connector, "n1").await;
        let oracle = oracle(vec![("m1", answer("n1", true)), ("m2", answer("n1", true))]);

        let result = oracle.ask_alive(&n).await.unwrap();
        assert_eq!(result, VoteResult { votes: 3, total: 3 });
        assert!(result.is_alive());
    }

    #[tokio::test]
    async fn test_local_ping_failure_costs_one_vote() {
        let connector = MemoryConnector::new();
        let n = node(&connector, "n1").await;
        connector.kill("n1");
        let oracle = oracle(vec![("m1", answer("n1", true)), ("m2", answer("n1", false))]);

        let result = oracle.ask_alive(&n).await.unwrap();
        assert_eq!(result, VoteResult { votes: 1, total: 3 });
        assert!(!result.is_alive());
    }

    #[tokio::test]
    async fn test_mismatched_address_aborts() {
        let connector = MemoryConnector::new();
        let n = node(&connector, "n1").await;
        let oracle = oracle(vec![("m1", answer("other", true))]);

        let err = oracle.ask_alive(&n).await.unwrap_err();
        assert!(matches!(err, Error::MonitorMismatch { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_monitor_error_aborts() {
        let connector = MemoryConnector::new();
        let n = node(&connector, "n1").await;
        let scripted = oracle(vec![("m1", answer("n1", true))]);
        // "missing" has no script, so its query fails outright
        let oracle = LivenessOracle::new(
            vec!["m1".into(), "missing".into()],
            scripted.probe.clone(),
            None,
        );

        assert!(matches!(
            oracle.ask_alive(&n).await,
            Err(Error::QuorumIndeterminate { .. })
        ));
    }

    #[tokio::test]
    async fn test_error_message_aborts() {
        let connector = MemoryConnector::new();
        let n = node(&connector, "n1").await;
        let oracle = oracle(vec![(
            "m1",
            Some(MonitorResponse {
                redis_node_address: "n1".into(),
                is_alive: false,
                error_message: "pool exhausted".into(),
            }),
        )]);

        assert!(matches!(
            oracle.ask_alive(&n).await,
            Err(Error::QuorumIndeterminate { .. })
        ));
    }

    #[tokio::test]
    async fn test_hung_monitor_counts_as_no() {
        let connector = MemoryConnector::new();
        let n = node(&connector, "n1").await;
        let oracle = oracle(vec![("m1", answer("n1", true)), ("hung", None)]);

        let result = oracle.ask_alive(&n).await.unwrap();
        assert_eq!(result, VoteResult { votes: 2, total: 3 });
        assert!(result.is_alive());
    }

    #[tokio::test]
    async fn test_silent_node_gets_no_local_vote() {
        use crate::coordinator::node_client::RespConnector;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        // The node's own command deadline is far longer than the vote deadline
        let connector = RespConnector::new(Duration::from_secs(1))
            .with_command_timeout(Duration::from_secs(60));
        let n = Node::new(&addr, NodeRole::Primary, connector.connect(&addr).await.unwrap());
        let oracle = oracle(vec![]);

        let result = tokio::time::timeout(Duration::from_secs(3), oracle.ask_alive(&n))
            .await
            .expect("vote did not finish")
            .unwrap();
        assert_eq!(result, VoteResult { votes: 0, total: 1 });
    }

    #[tokio::test]
    async fn test_no_monitors_uses_local_ping_only() {
        let connector = MemoryConnector::new();
        let n = node(&connector, "n1").await;
        let oracle = oracle(vec![]);
        assert!(oracle.ask_alive(&n).await.unwrap().is_alive());

        connector.kill("n1");
        assert!(!oracle.ask_alive(&n).await.unwrap().is_alive());
    }
}
