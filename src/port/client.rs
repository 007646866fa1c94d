//! Traffic generator for client ports.
//!
//! The generator follows the state of its controlling FSM through a `watch` receiver. Each loop
//! re-reads the state, so a wake for any reason lands on the flow of the current state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{PortContext, PortError};
use crate::model::{Flow, Port, Transport};
use crate::state_machine::StateMachine;
use crate::state_machine::shaper::{Duty, FlowShaper, TickPlan};
use crate::state_machine::wrappers::input::SystemInput;
use crate::trace::{CAT_FLOW, CAT_PACKET_SND};

const CONNECT_RETRY: Duration = Duration::from_secs(1);
/// Lag after which missed ticks are dropped instead of sent in a burst.
const MAX_LAG: Duration = Duration::from_millis(50);

fn resync_threshold(interval: Duration) -> Duration {
    MAX_LAG.max(interval * 4)
}

enum ClientSocket {
    Tcp(TcpStream),
    Udp { socket: UdpSocket, remote: SocketAddr },
}

impl ClientSocket {
    /// Open the socket, retrying TCP connects until success or termination.
    async fn open(port: &Port, remote: SocketAddr, ctx: &PortContext) -> Result<Option<Self>, PortError> {
        match port.transport() {
            Transport::Udp => {
                let socket = UdpSocket::bind(port.local()).await.map_err(|source| PortError::Bind {
                    port: port.name().to_string(),
                    transport: Transport::Udp,
                    address: port.local(),
                    source,
                })?;
                Ok(Some(ClientSocket::Udp { socket, remote }))
            }
            Transport::Tcp => loop {
                match TcpStream::connect(remote).await {
                    Ok(stream) => {
                        info!(component = %ctx.component, port = %port.name(), %remote, "Connected");
                        return Ok(Some(ClientSocket::Tcp(stream)));
                    }
                    Err(e) => {
                        debug!(port = %port.name(), %remote, error = %e, "Connect failed, retrying");
                    }
                }
                tokio::select! {
                    _ = ctx.termination.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(CONNECT_RETRY) => {}
                }
            },
        }
    }

    async fn send(&mut self, payload: &[u8]) -> std::io::Result<()> {
        match self {
            ClientSocket::Tcp(stream) => stream.write_all(payload).await,
            ClientSocket::Udp { socket, remote } => socket.send_to(payload, *remote).await.map(drop),
        }
    }
}

/// Overwrite `buffer` with zeros followed by the decimal text of `value`, truncated to fit.
fn fill_payload(buffer: &mut [u8], value: usize) {
    buffer.fill(0);
    let text = value.to_string();
    let len = text.len().min(buffer.len());
    buffer[..len].copy_from_slice(&text.as_bytes()[..len]);
}

/// Pace traffic on a client port according to the flow mapped for the FSM's current state.
///
/// Runs until termination. Returns an error if the port cannot be opened or the FSM enters a
/// state with no flow mapped.
pub async fn run_client(
    port: Arc<Port>,
    fsm: String,
    mut state_rx: watch::Receiver<Arc<str>>,
    ctx: PortContext,
) -> Result<(), PortError> {
    let endpoint = port.endpoint().ok_or_else(|| PortError::NotClient {
        port: port.name().to_string(),
    })?;
    let Some(mut socket) = ClientSocket::open(&port, endpoint.remote(), &ctx).await? else {
        info!(component = %ctx.component, port = %port.name(), "Terminated before connecting");
        return Ok(());
    };

    let mut shaper = FlowShaper::new();
    let mut active: Option<Arc<Flow>> = None;
    let mut buffer = Vec::new();
    let mut deadline = Instant::now();

    let result = loop {
        if ctx.termination.is_cancelled() {
            break Ok(());
        }

        let state = state_rx.borrow_and_update().clone();
        let Some(flow) = endpoint.flow_for(&state) else {
            break Err(PortError::NoFlow {
                port: port.name().to_string(),
                fsm: fsm.clone(),
                state: state.to_string(),
            });
        };

        if !active.as_ref().is_some_and(|current| Arc::ptr_eq(current, flow)) {
            if let Some(previous) = active.take() {
                ctx.trace.boundary(previous.name(), ctx.pid, CAT_FLOW, previous.trace_args(&fsm));
            }
            ctx.trace.boundary(flow.name(), ctx.pid, CAT_FLOW, flow.trace_args(&fsm));
            info!(component = %ctx.component, port = %port.name(), %state, flow = %flow, "Flow activated");

            buffer.resize(flow.buffer_size(), 0);
            shaper.process_input(SystemInput::Input(Flow::clone(flow)));
            deadline = Instant::now();
            active = Some(Arc::clone(flow));
        }

        shaper.process_input(SystemInput::system());
        let Some(TickPlan { value, duty, interval }) = shaper.poll_output() else {
            continue;
        };

        let now = Instant::now();
        let lag = now.saturating_duration_since(deadline);
        if lag > resync_threshold(interval) {
            debug!(port = %port.name(), ?lag, "Pacing fell behind, resynchronising");
            deadline = now;
        }
        let tick_at = deadline + interval;

        // Ticks already due are sent without sleeping, so intervals below the timer
        // resolution still average out to the configured rate.
        if tick_at > now {
            tokio::select! {
                biased;
                _ = ctx.termination.cancelled() => break Ok(()),
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    continue;
                }
                _ = tokio::time::sleep_until(tick_at) => {}
            }
        } else {
            tokio::task::consume_budget().await;
        }
        deadline = tick_at;

        if duty == Duty::Off {
            continue;
        }

        fill_payload(&mut buffer, value);
        ctx.trace.instant(
            port.name(),
            ctx.pid,
            CAT_PACKET_SND,
            vec![
                port.transport().to_string(),
                fsm.clone(),
                state.to_string(),
                value.to_string(),
            ],
        );
        if let Err(e) = socket.send(&buffer).await {
            warn!(component = %ctx.component, port = %port.name(), error = %e, "Send failed");
        }
    };

    if let Some(previous) = active {
        ctx.trace.boundary(previous.name(), ctx.pid, CAT_FLOW, previous.trace_args(&fsm));
    }
    match &result {
        Ok(()) => info!(component = %ctx.component, port = %port.name(), "Traffic generator stopped"),
        Err(e) => error!(component = %ctx.component, port = %port.name(), error = %e, "Traffic generator failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::model::ClientEndpoint;
    use crate::shutdown::Termination;
    use crate::trace::{Phase, TraceLog};

    fn context() -> PortContext {
        PortContext {
            component: "client".into(),
            pid: 2,
            trace: Arc::new(TraceLog::new()),
            termination: Termination::new(),
        }
    }

    fn udp_client(remote: SocketAddr, flows: Vec<(&str, Flow)>) -> Arc<Port> {
        let flows: HashMap<_, _> = flows
            .into_iter()
            .map(|(state, flow)| (state.to_string(), Arc::new(flow)))
            .collect();
        Arc::new(Port::client(
            "tx",
            Transport::Udp,
            "0.0.0.0:0".parse().unwrap(),
            ClientEndpoint::new(remote, "m1", flows),
        ))
    }

    #[test]
    fn test_fill_payload() {
        let mut buffer = vec![0xffu8; 6];
        fill_payload(&mut buffer, 42);
        assert_eq!(buffer, b"42\0\0\0\0");

        let mut short = vec![0u8; 2];
        fill_payload(&mut short, 12345);
        assert_eq!(short, b"12");
    }

    #[tokio::test]
    async fn test_simple_flow_paces_udp_packets() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = udp_client(
            receiver.local_addr().unwrap(),
            vec![("s1", Flow::simple("f1", 64.0, 10.0).unwrap())],
        );
        let (_state_tx, state_rx) = watch::channel(Arc::<str>::from("s1"));
        let ctx = context();

        let started = Instant::now();
        let task = tokio::spawn(run_client(port, "m1".into(), state_rx, ctx.clone()));

        let mut sizes = Vec::new();
        let mut buf = [0u8; 256];
        while let Ok(Ok((n, _))) =
            tokio::time::timeout_at(started + Duration::from_millis(105), receiver.recv_from(&mut buf)).await
        {
            sizes.push(n);
        }
        ctx.termination.cancel();
        task.await.unwrap().unwrap();

        assert!((9..=11).contains(&sizes.len()), "sent {} packets", sizes.len());
        assert!(sizes.iter().all(|&n| n == 64));
    }

    #[tokio::test]
    async fn test_sub_millisecond_interval_keeps_rate() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = udp_client(
            receiver.local_addr().unwrap(),
            vec![("s1", Flow::simple("fast", 8.0, 0.25).unwrap())],
        );
        let (_state_tx, state_rx) = watch::channel(Arc::<str>::from("s1"));
        let ctx = context();

        let started = Instant::now();
        let task = tokio::spawn(run_client(port, "m1".into(), state_rx, ctx.clone()));

        let mut sent = 0;
        let mut buf = [0u8; 64];
        while let Ok(Ok(_)) =
            tokio::time::timeout_at(started + Duration::from_millis(200), receiver.recv_from(&mut buf)).await
        {
            sent += 1;
        }
        ctx.termination.cancel();
        task.await.unwrap().unwrap();

        // 800 ticks fit in the window.
        assert!((600..=810).contains(&sent), "sent {sent} packets");
    }

    #[test]
    fn test_resync_threshold() {
        assert_eq!(resync_threshold(Duration::from_micros(250)), MAX_LAG);
        assert_eq!(resync_threshold(Duration::from_secs(1)), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_state_change_switches_flow() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = udp_client(
            receiver.local_addr().unwrap(),
            vec![
                ("s1", Flow::simple("small", 16.0, 5.0).unwrap()),
                ("s2", Flow::simple("large", 128.0, 5.0).unwrap()),
            ],
        );
        let (state_tx, state_rx) = watch::channel(Arc::<str>::from("s1"));
        let ctx = context();
        let task = tokio::spawn(run_client(port, "m1".into(), state_rx, ctx.clone()));

        let mut buf = [0u8; 256];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, 16);

        state_tx.send_replace(Arc::from("s2"));
        let switched = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
                if n == 128 {
                    break;
                }
            }
        })
        .await;
        assert!(switched.is_ok());

        ctx.termination.cancel();
        task.await.unwrap().unwrap();

        let flows = ctx.trace.with_category(CAT_FLOW);
        assert_eq!(flows.len(), 2);
        assert!(flows.iter().all(|record| record.phase == Phase::Begin && record.end.is_some()));
        assert_eq!(flows[1].args, vec!["simple", "m1", "128", "5"]);
    }

    #[tokio::test]
    async fn test_unmapped_state_stops_generator() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = udp_client(
            receiver.local_addr().unwrap(),
            vec![("s1", Flow::simple("f1", 8.0, 5.0).unwrap())],
        );
        let (_state_tx, state_rx) = watch::channel(Arc::<str>::from("elsewhere"));

        let result = run_client(port, "m1".into(), state_rx, context()).await;
        assert!(matches!(result, Err(PortError::NoFlow { .. })));
    }

    #[tokio::test]
    async fn test_tcp_connect_abandoned_on_termination() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let remote = listener.local_addr().unwrap();
        drop(listener);

        let port = Arc::new(Port::client(
            "tx",
            Transport::Tcp,
            "0.0.0.0:0".parse().unwrap(),
            ClientEndpoint::new(
                remote,
                "m1",
                HashMap::from([("s1".to_string(), Arc::new(Flow::simple("f", 8.0, 5.0).unwrap()))]),
            ),
        ));
        let (_state_tx, state_rx) = watch::channel(Arc::<str>::from("s1"));
        let ctx = context();
        let task = tokio::spawn(run_client(port, "m1".into(), state_rx, ctx.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.termination.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(ctx.trace.is_empty());
    }
}
