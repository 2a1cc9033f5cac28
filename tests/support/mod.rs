// tests/support/mod.rs

//! In-process fake sentinel and store nodes for exercising the client
//! against live TCP endpoints.

// Each test binary uses its own slice of this fixture.
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use sentinel_pool::protocol::{RespFrame, RespFrameCodec};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

/// What a fake node reports for `ROLE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRole {
    Sentinel,
    Master,
    Replica,
}

impl NodeRole {
    fn name(self) -> &'static str {
        match self {
            NodeRole::Sentinel => "sentinel",
            NodeRole::Master => "master",
            NodeRole::Replica => "slave",
        }
    }
}

/// The (host, port) a fake sentinel reports for `get-master-addr-by-name`.
/// Shared with tests so a failover can be simulated by swapping it.
pub type ReportedMaster = Arc<Mutex<(String, String)>>;

pub fn reported(addr: &str) -> ReportedMaster {
    let (host, port) = addr.rsplit_once(':').expect("host:port");
    Arc::new(Mutex::new((host.to_string(), port.to_string())))
}

pub struct FakeNode {
    pub addr: String,
    /// Every command received, args joined by spaces, in arrival order.
    pub log: Arc<Mutex<Vec<String>>>,
    events: broadcast::Sender<(String, String)>,
    accept_task: JoinHandle<()>,
    conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FakeNode {
    pub async fn spawn(
        role: NodeRole,
        reported_master: Option<ReportedMaster>,
        peers: Vec<(String, String)>,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let (events, _) = broadcast::channel(64);
        let conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_task = {
            let log = log.clone();
            let events = events.clone();
            let conn_tasks = conn_tasks.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    let task = tokio::spawn(handle_conn(
                        socket,
                        role,
                        reported_master.clone(),
                        peers.clone(),
                        log.clone(),
                        events.subscribe(),
                    ));
                    conn_tasks.lock().push(task);
                }
            })
        };

        Self {
            addr,
            log,
            events,
            accept_task,
            conn_tasks,
        }
    }

    /// Pushes a pub/sub message to every connection subscribed to `channel`.
    pub fn publish(&self, channel: &str, payload: &str) {
        let _ = self.events.send((channel.to_string(), payload.to_string()));
    }

    /// Stops listening and severs every open connection; subsequent dials
    /// to this node are refused.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        for task in self.conn_tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Number of received commands whose textual form starts with `prefix`.
    pub fn command_count(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .count()
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handle_conn(
    socket: TcpStream,
    role: NodeRole,
    reported_master: Option<ReportedMaster>,
    peers: Vec<(String, String)>,
    log: Arc<Mutex<Vec<String>>>,
    mut events: broadcast::Receiver<(String, String)>,
) {
    let mut framed = Framed::new(socket, RespFrameCodec);
    let mut channels: HashSet<String> = HashSet::new();
    loop {
        tokio::select! {
            incoming = framed.next() => {
                let Some(Ok(frame)) = incoming else { return };
                let Some(args) = to_args(&frame) else { return };
                log.lock().push(args.join(" "));
                for reply in respond(&args, role, &reported_master, &peers, &mut channels) {
                    if framed.send(reply).await.is_err() {
                        return;
                    }
                }
            }
            event = events.recv() => {
                let Ok((channel, payload)) = event else { return };
                if channels.contains(&channel) {
                    let push = RespFrame::Array(vec![
                        bulk("message"),
                        bulk(&channel),
                        bulk(&payload),
                    ]);
                    if framed.send(push).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn respond(
    args: &[String],
    role: NodeRole,
    reported_master: &Option<ReportedMaster>,
    peers: &[(String, String)],
    channels: &mut HashSet<String>,
) -> Vec<RespFrame> {
    let Some(command) = args.first() else {
        return vec![RespFrame::Error("ERR empty command".to_string())];
    };
    match command.to_ascii_uppercase().as_str() {
        "ROLE" => vec![RespFrame::Array(vec![
            bulk(role.name()),
            RespFrame::Integer(0),
            RespFrame::Array(vec![]),
        ])],
        "PING" => vec![RespFrame::SimpleString("PONG".to_string())],
        "GET" => vec![bulk("b")],
        "SET" => vec![RespFrame::SimpleString("OK".to_string())],
        "SUBSCRIBE" => args[1..]
            .iter()
            .enumerate()
            .map(|(i, key)| {
                channels.insert(key.clone());
                RespFrame::Array(vec![
                    bulk("subscribe"),
                    bulk(key),
                    RespFrame::Integer(i as i64 + 1),
                ])
            })
            .collect(),
        "SENTINEL" => match args.get(1).map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("sentinels") => vec![RespFrame::Array(
                peers
                    .iter()
                    .map(|(host, port)| {
                        RespFrame::Array(vec![
                            bulk("name"),
                            bulk(&format!("{host}:{port}")),
                            bulk("ip"),
                            bulk(host),
                            bulk("port"),
                            bulk(port),
                        ])
                    })
                    .collect(),
            )],
            Some("get-master-addr-by-name") => match reported_master {
                Some(master) => {
                    let (host, port) = master.lock().clone();
                    vec![RespFrame::Array(vec![bulk(&host), bulk(&port)])]
                }
                None => vec![RespFrame::NullArray],
            },
            _ => vec![RespFrame::Error(
                "ERR unknown sentinel subcommand".to_string(),
            )],
        },
        other => vec![RespFrame::Error(format!("ERR unknown command '{other}'"))],
    }
}

pub fn bulk(s: &str) -> RespFrame {
    RespFrame::BulkString(bytes::Bytes::copy_from_slice(s.as_bytes()))
}

fn to_args(frame: &RespFrame) -> Option<Vec<String>> {
    let RespFrame::Array(items) = frame else {
        return None;
    };
    items
        .iter()
        .map(|item| match item {
            RespFrame::BulkString(b) => Some(String::from_utf8_lossy(b).into_owned()),
            RespFrame::SimpleString(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}
