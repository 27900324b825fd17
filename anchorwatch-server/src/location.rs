//! NMEA 0183 over UDP location source.
//!
//! Chart plotters and multiplexers commonly broadcast NMEA sentences on UDP
//! port 10110. The listener parses `RMC`/`GGA` sentences into fixes and
//! forwards them to the watch task through a bounded channel, thinned to the
//! interval of the active subscription.
//!
//! There is no subscription while the watch is disarmed: datagrams are still
//! read (so the socket buffer does not fill) but nothing is forwarded.

use anchorwatch_core::{
    nmea::FixParser, Fix, FixThrottle, LocationError, LocationProvider, LocationRequest,
    ParseError, SubscriptionId,
};
use log::{debug, info, trace, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;

use crate::{now_ms, ServerError};

/// Fixes waiting for the watch task
pub const FIX_CHANNEL_CAPACITY: usize = 64;

const MAX_DATAGRAM: usize = 4096;

pub type FixSender = mpsc::Sender<(SubscriptionId, Fix)>;
pub type FixReceiver = mpsc::Receiver<(SubscriptionId, Fix)>;

#[derive(Debug, Default)]
struct ProviderState {
    next_id: u64,
    active: Option<(SubscriptionId, FixThrottle)>,
    /// Set when the socket could not be opened or failed while reading
    failure: Option<LocationError>,
    last_fix: Option<Fix>,
}

/// [`LocationProvider`] backed by an NMEA UDP feed.
///
/// The provider owns the socket lifecycle: [`NmeaUdpProvider::open`] binds
/// the socket and hands it to the [`NmeaListener`]. After a failure the next
/// location request binds again.
#[derive(Debug)]
pub struct NmeaUdpProvider {
    address: SocketAddr,
    state: Mutex<ProviderState>,
    sockets_tx: mpsc::UnboundedSender<UdpSocket>,
    sockets_rx: Mutex<Option<mpsc::UnboundedReceiver<UdpSocket>>>,
}

impl NmeaUdpProvider {
    pub fn new(address: SocketAddr) -> Self {
        let (sockets_tx, sockets_rx) = mpsc::unbounded_channel();
        NmeaUdpProvider {
            address,
            state: Mutex::new(ProviderState::default()),
            sockets_tx,
            sockets_rx: Mutex::new(Some(sockets_rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Bind the socket and pass it to the listener. Clears any recorded
    /// failure and returns the bound address.
    pub fn open(&self) -> Result<SocketAddr, LocationError> {
        let socket = bind(self.address)?;
        let local = socket
            .local_addr()
            .map_err(|e| LocationError::Unavailable(e.to_string()))?;
        self.sockets_tx
            .send(socket)
            .map_err(|_| LocationError::Unavailable("NMEA listener stopped".to_string()))?;

        self.lock().failure = None;
        Ok(local)
    }

    /// Record that the feed cannot be read. Drops the active subscription.
    pub fn set_failure(&self, failure: LocationError) {
        let mut state = self.lock();
        state.active = None;
        state.failure = Some(failure);
    }

    pub fn failure(&self) -> Option<LocationError> {
        self.lock().failure.clone()
    }

    pub fn active(&self) -> Option<SubscriptionId> {
        self.lock().active.as_ref().map(|(id, _)| *id)
    }

    /// Remember `fix` as the last known position
    pub fn note_fix(&self, fix: &Fix) {
        self.lock().last_fix = Some(*fix);
    }

    /// Pass one fix arriving at `now_ms` through the active subscription's
    /// throttle. Returns the subscription it belongs to, if any.
    pub fn offer(&self, now_ms: u64) -> Option<SubscriptionId> {
        let mut state = self.lock();
        let (id, throttle) = state.active.as_mut()?;
        throttle.accept(now_ms).then_some(*id)
    }

    fn take_sockets(&self) -> Option<mpsc::UnboundedReceiver<UdpSocket>> {
        self.sockets_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl LocationProvider for NmeaUdpProvider {
    fn request_updates(&self, request: LocationRequest) -> Result<SubscriptionId, LocationError> {
        if let Some(failure) = self.failure() {
            info!("NMEA source failed earlier ({}), binding again", failure);
            self.open().inspect_err(|e| self.lock().failure = Some(e.clone()))?;
        }

        let mut state = self.lock();
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        if let Some((old, _)) = state.active.replace((id, FixThrottle::new(&request))) {
            warn!("Subscription {:?} replaced without cancel", old);
        }
        debug!(
            "NMEA subscription {:?}: every {} ms, min {} ms",
            id, request.interval_ms, request.min_interval_ms
        );
        Ok(id)
    }

    fn cancel(&self, subscription: SubscriptionId) {
        let mut state = self.lock();
        if state.active.as_ref().is_some_and(|(id, _)| *id == subscription) {
            state.active = None;
            debug!("NMEA subscription {:?} cancelled", subscription);
        }
    }

    fn has_permission(&self) -> bool {
        !matches!(self.lock().failure, Some(LocationError::PermissionDenied))
    }

    fn last_known(&self) -> Option<Fix> {
        self.lock().last_fix
    }
}

/// Bind the NMEA socket, mapping refusals onto location errors.
///
/// Binding is synchronous so a location request can retry it; the socket is
/// registered with the current tokio runtime.
pub fn bind(addr: SocketAddr) -> Result<UdpSocket, LocationError> {
    if tokio::runtime::Handle::try_current().is_err() {
        return Err(LocationError::Unavailable(
            "no runtime to read NMEA on".to_string(),
        ));
    }

    let socket = std::net::UdpSocket::bind(addr).and_then(|socket| {
        socket.set_nonblocking(true)?;
        UdpSocket::from_std(socket)
    });

    match socket {
        Ok(socket) => {
            info!("Listening for NMEA 0183 on udp://{}", addr);
            Ok(socket)
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            warn!("Not allowed to bind NMEA socket {}: {}", addr, e);
            Err(LocationError::PermissionDenied)
        }
        Err(e) => {
            warn!("Cannot bind NMEA socket {}: {}", addr, e);
            Err(LocationError::Unavailable(format!("{}: {}", addr, e)))
        }
    }
}

/// Parse every sentence in a datagram and forward accepted fixes.
/// Returns the number of fixes forwarded.
fn dispatch(
    provider: &NmeaUdpProvider,
    parser: &mut FixParser,
    fix_tx: &FixSender,
    data: &[u8],
    received_ms: i64,
) -> usize {
    let text = String::from_utf8_lossy(data);
    let mut forwarded = 0;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fix = match parser.parse(line, received_ms) {
            Ok(fix) => fix,
            Err(ParseError::Unsupported(kind)) => {
                trace!("Ignoring {} sentence", kind);
                continue;
            }
            Err(e) => {
                debug!("Dropping sentence '{}': {}", line, e);
                continue;
            }
        };
        provider.note_fix(&fix);

        let Some(id) = provider.offer(received_ms.max(0) as u64) else {
            continue;
        };
        match fix_tx.try_send((id, fix)) {
            Ok(()) => forwarded += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Watch task busy, fix dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Watch task gone, fix dropped");
            }
        }
    }
    forwarded
}

/// Reads whichever socket the provider last opened.
///
/// A read error is recorded on the provider and the listener waits for the
/// next socket instead of stopping.
pub struct NmeaListener {
    provider: Arc<NmeaUdpProvider>,
    sockets: mpsc::UnboundedReceiver<UdpSocket>,
    fix_tx: FixSender,
    parser: FixParser,
}

impl NmeaListener {
    /// Returns `None` if another listener already serves `provider`.
    pub fn new(provider: Arc<NmeaUdpProvider>, fix_tx: FixSender) -> Option<Self> {
        let sockets = provider.take_sockets()?;
        Some(NmeaListener {
            provider,
            sockets,
            fix_tx,
            parser: FixParser::new(),
        })
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        loop {
            let socket = tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    debug!("NMEA listener shutting down");
                    return Ok(());
                },
                s = self.sockets.recv() => match s {
                    Some(socket) => socket,
                    None => {
                        subsys.on_shutdown_requested().await;
                        return Ok(());
                    }
                },
            };

            match self.read(&socket, &subsys).await {
                Ok(()) => {
                    debug!("NMEA listener shutting down");
                    return Ok(());
                }
                Err(e) => {
                    warn!("NMEA socket failed: {}", e);
                    self.provider.set_failure(LocationError::Io(e.to_string()));
                }
            }
        }
    }

    /// Read datagrams until shutdown (`Ok`) or a socket error
    async fn read(&mut self, socket: &UdpSocket, subsys: &SubsystemHandle) -> io::Result<()> {
        let mut buf = Vec::with_capacity(MAX_DATAGRAM);

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => return Ok(()),
                r = socket.recv_buf_from(&mut buf) => {
                    let (len, from) = r?;
                    trace!("{} bytes of NMEA from {}", len, from);
                    dispatch(&self.provider, &mut self.parser, &self.fix_tx, &buf, now_ms());
                },
            }
            buf.clear();
        }
    }
}
