//! The event loop.
//!
//! Everything runs on one thread inside a `LocalSet`. Small local tasks
//! watch sockets, accept connections, resolve names and connect upstream;
//! all they do is post an [`Event`] back to the loop, which is the only
//! place the [`Bouncer`] is touched.
//!
//! A socket watcher reports readability once and then waits to be re-armed
//! after the bouncer has read, so each readable event is followed by exactly
//! one `read`.

use super::session::SessionId;
use super::transport::TcpTransport;
use crate::state::{Bouncer, Request};
use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use std::collections::HashMap;
use std::future;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{Notify, mpsc};
use tokio::task::spawn_local;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Give up on an upstream TCP connect after this long.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Current wall-clock time in seconds, the bouncer's unit of time.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Something a helper task wants the loop to know.
enum Event {
    Accepted(TcpStream),
    Readable(SessionId),
    Writable(SessionId),
    HostResolved {
        token: u64,
        result: Result<IpAddr, String>,
    },
    AddrResolved {
        token: u64,
        name: Option<String>,
    },
    Connected {
        user: String,
        stream: TcpStream,
    },
    ConnectFailed {
        user: String,
        error: String,
    },
}

/// Watcher bookkeeping for one socket.
struct Watch {
    stream: Rc<TcpStream>,
    rearm: Rc<Notify>,
    cancel: CancellationToken,
    awaiting_write: bool,
}

pub struct Reactor {
    bouncer: Bouncer,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    resolver: TokioResolver,
    watches: HashMap<SessionId, Watch>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    shutdown: CancellationToken,
}

impl Reactor {
    /// Bind the client listener.
    pub async fn bind(bouncer: Bouncer, addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "Client listener bound");

        // Try system config, fall back to defaults
        let resolver = TokioResolver::builder_tokio()
            .map(|b| b.build())
            .unwrap_or_else(|_| {
                TokioResolver::builder_with_config(ResolverConfig::default(), TokioConnectionProvider::default())
                    .build()
            });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            bouncer,
            listener: Some(listener),
            local_addr,
            resolver,
            watches: HashMap::new(),
            events_tx,
            events_rx,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn bouncer(&self) -> &Bouncer {
        &self.bouncer
    }

    pub fn bouncer_mut(&mut self) -> &mut Bouncer {
        &mut self.bouncer
    }

    /// Cancelling this token starts an orderly shutdown, as `die` does.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the bouncer has shut down. Must be called inside a
    /// `tokio::task::LocalSet`.
    #[instrument(skip(self), name = "reactor")]
    pub async fn run(mut self) {
        if let Some(listener) = self.listener.take() {
            spawn_local(accept_loop(listener, self.events_tx.clone(), self.shutdown.child_token()));
        }

        let mut tick = interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pending = false;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled(), if !self.bouncer.is_dying() => {
                    self.bouncer.die("signal", unix_now());
                }
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                _ = tick.tick() => self.bouncer.tick(unix_now()),
                _ = future::ready(()), if pending => {}
            }

            self.process_requests();
            let report = self.bouncer.flush(unix_now());
            pending = report.more;
            for id in report.blocked {
                self.await_writable(id);
            }
            self.process_requests();

            if self.bouncer.is_finished() {
                info!("All sessions closed, stopping");
                self.shutdown.cancel();
                break;
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        let now = unix_now();
        match event {
            Event::Accepted(stream) => {
                if self.bouncer.is_dying() {
                    return;
                }
                let stream = Rc::new(stream);
                let id = self
                    .bouncer
                    .accept(Box::new(TcpTransport::new(Rc::clone(&stream))), now);
                self.watch(id, stream);
            }
            Event::Readable(id) => {
                self.bouncer.on_readable(id, now);
                if let Some(watch) = self.watches.get(&id) {
                    watch.rearm.notify_one();
                }
            }
            Event::Writable(id) => {
                if let Some(watch) = self.watches.get_mut(&id) {
                    watch.awaiting_write = false;
                }
                self.bouncer.on_writable(id);
            }
            Event::HostResolved { token, result } => self.bouncer.host_resolved(token, result, now),
            Event::AddrResolved { token, name } => self.bouncer.addr_resolved(token, name),
            Event::Connected { user, stream } => {
                let stream = Rc::new(stream);
                let transport = Box::new(TcpTransport::new(Rc::clone(&stream)));
                if let Some(id) = self.bouncer.upstream_connected(&user, transport, now) {
                    self.watch(id, stream);
                }
            }
            Event::ConnectFailed { user, error } => self.bouncer.connect_failed(&user, &error, now),
        }
    }

    /// Carry out what the bouncer asked for.
    fn process_requests(&mut self) {
        for request in self.bouncer.take_requests() {
            match request {
                Request::ResolveHost { token, host } => {
                    let resolver = self.resolver.clone();
                    let tx = self.events_tx.clone();
                    spawn_local(async move {
                        let result = resolve_host(&resolver, &host).await;
                        let _ = tx.send(Event::HostResolved { token, result });
                    });
                }
                Request::ResolveAddr { token, ip } => {
                    let resolver = self.resolver.clone();
                    let tx = self.events_tx.clone();
                    spawn_local(async move {
                        let name = match resolver.reverse_lookup(ip).await {
                            Ok(lookup) => lookup
                                .iter()
                                .next()
                                .map(|name| name.to_string().trim_end_matches('.').to_string()),
                            Err(e) => {
                                debug!(%ip, error = %e, "Reverse lookup failed");
                                None
                            }
                        };
                        let _ = tx.send(Event::AddrResolved { token, name });
                    });
                }
                Request::Connect { user, addr, bind } => {
                    let tx = self.events_tx.clone();
                    spawn_local(async move {
                        let event = match connect(addr, bind).await {
                            Ok(stream) => Event::Connected { user, stream },
                            Err(e) => Event::ConnectFailed {
                                user,
                                error: e.to_string(),
                            },
                        };
                        let _ = tx.send(event);
                    });
                }
                Request::Forget(id) => {
                    if let Some(watch) = self.watches.remove(&id) {
                        watch.cancel.cancel();
                    }
                }
            }
        }
    }

    fn watch(&mut self, id: SessionId, stream: Rc<TcpStream>) {
        let rearm = Rc::new(Notify::new());
        // Not a child of `shutdown`: sessions keep draining while dying.
        let cancel = CancellationToken::new();
        spawn_local(watch_readable(
            id,
            Rc::clone(&stream),
            Rc::clone(&rearm),
            cancel.clone(),
            self.events_tx.clone(),
        ));
        self.watches.insert(
            id,
            Watch {
                stream,
                rearm,
                cancel,
                awaiting_write: false,
            },
        );
    }

    /// Wake the loop once `id` can be written again.
    fn await_writable(&mut self, id: SessionId) {
        let Some(watch) = self.watches.get_mut(&id) else {
            return;
        };
        if watch.awaiting_write {
            return;
        }
        watch.awaiting_write = true;
        let stream = Rc::clone(&watch.stream);
        let cancel = watch.cancel.clone();
        let tx = self.events_tx.clone();
        spawn_local(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = stream.writable() => {
                    let _ = tx.send(Event::Writable(id));
                }
            }
        });
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::UnboundedSender<Event>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(%addr, "Connection accepted");
                    if tx.send(Event::Accepted(stream)).is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            },
        }
    }
}

async fn watch_readable(
    id: SessionId,
    stream: Rc<TcpStream>,
    rearm: Rc<Notify>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<Event>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = stream.readable() => {
                if tx.send(Event::Readable(id)).is_err() {
                    return;
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = rearm.notified() => {}
        }
    }
}

async fn resolve_host(resolver: &TokioResolver, host: &str) -> Result<IpAddr, String> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    match resolver.lookup_ip(host).await {
        Ok(lookup) => lookup
            .iter()
            .next()
            .ok_or_else(|| format!("no addresses for {host}")),
        Err(e) => Err(e.to_string()),
    }
}

/// TCP connect to `addr`, from `bind` when given.
async fn connect(addr: SocketAddr, bind: Option<IpAddr>) -> std::io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if let Some(ip) = bind {
        socket.bind(SocketAddr::new(ip, 0))?;
    }
    timeout(CONNECT_TIMEOUT, socket.connect(addr))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))?
}
