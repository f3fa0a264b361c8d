mod handshake;
mod state;
mod strings;

pub use handshake::Negotiated;
pub use state::{ConnectionState, OptimizerConfig, SessionConfig, TsapConfig};
pub use strings::TagAccess;

use super::{
    error::{Error, Result, S7HeaderError},
    frame::{
        build_read_clock, build_read_szl, build_read_var, build_setup_comm, build_write_var,
        S7Pdu, S7PayloadRef, S7ReturnCode, S7VarSpec,
    },
    planner::{ReadJob, ReadPlan, WritePlan},
    request::{RawItem, ReadRequest, ReadResponse, ResponseCode, WriteRequest, WriteResponse},
    tag::Tag,
    transaction::{TransactionGuard, TransactionManager},
    transport::{ConnectionParams, Transport, TransportFrame},
};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{future::try_join_all, SinkExt, StreamExt};
use handshake::{Action, HandshakeMachine, SZL_MODULE_ID, SZL_MODULE_ID_INDEX};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    select,
    sync::{mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// Far-future deadline used while nothing is in flight.
const IDLE_DEADLINE: Duration = Duration::from_secs(3600);

/// Request handed to the connection driver.
#[derive(Debug)]
struct SessionRequest {
    pdu: S7Pdu,
    timeout: Duration,
    response_tx: oneshot::Sender<Result<S7Pdu>>,
    /// Transaction slot carried across the lifetime of this request
    guard: TransactionGuard,
}

/// Entry stored for each inflight request.
///
/// Owning the entry means owning one transaction slot; dropping it on
/// response, timeout, send failure or teardown frees the slot.
#[derive(Debug)]
struct InflightEntry {
    tx: oneshot::Sender<Result<S7Pdu>>,
    _guard: TransactionGuard,
}

/// One S7 connection: handshake, request correlation and admission control.
#[derive(Debug)]
pub struct Session {
    config: Arc<SessionConfig>,
    /// Queue into the connection driver, present while connected
    request_tx: ArcSwapOption<mpsc::Sender<SessionRequest>>,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    transactions: TransactionManager,
    /// TPDU reference generator, wraps within [1..=65535]
    pdu_ref_counter: AtomicU16,
    negotiated: ArcSwapOption<Negotiated>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Session {
            config: Arc::new(config),
            request_tx: ArcSwapOption::from(None),
            cancel: CancellationToken::new(),
            state_tx,
            state_rx,
            transactions: TransactionManager::new(),
            pdu_ref_counter: AtomicU16::new(0),
            negotiated: ArcSwapOption::from(None),
            driver: Mutex::new(None),
        })
    }

    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Handshake outcome, `None` until connected.
    pub fn negotiated(&self) -> Option<Negotiated> {
        self.negotiated.load_full().map(|n| *n)
    }

    /// Generate next PDU reference in range [1..=65535] with lock-free wrap-around.
    #[inline]
    fn next_pdu_ref(&self) -> u16 {
        loop {
            let cur = self.pdu_ref_counter.load(Ordering::Relaxed);
            let mut next = cur.wrapping_add(1);
            if next == 0 {
                next = 1;
            }
            if self
                .pdu_ref_counter
                .compare_exchange(cur, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return next;
            }
        }
    }

    fn publish_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }
}

/// Lifecycle
impl Session {
    /// Run the handshake over `transport` and start the connection driver.
    ///
    /// A session connects once. Any failure or timeout during the handshake
    /// closes the transport and leaves the session `Failed`; nothing is retried.
    #[instrument(level = "debug", skip_all)]
    pub async fn connect<T: Transport>(self: &Arc<Self>, mut transport: T) -> Result<Negotiated> {
        if self.state() != ConnectionState::Disconnected || self.cancel.is_cancelled() {
            return Err(Error::ErrUseClosedConnection);
        }

        let negotiated = match self.handshake(&mut transport).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Handshake failed");
                self.publish_state(ConnectionState::Failed);
                self.transactions.shutdown();
                if let Err(close_err) = transport.close().await {
                    debug!(error = %close_err, "Closing transport after failed handshake");
                }
                return Err(e);
            }
        };

        let (request_tx, request_rx) = mpsc::channel(self.config.request_queue_capacity.max(1));
        self.request_tx.store(Some(Arc::new(request_tx)));
        self.negotiated.store(Some(Arc::new(negotiated)));
        self.publish_state(ConnectionState::Connected);

        let handle = tokio::spawn(run_connection(
            Arc::clone(self),
            transport,
            request_rx,
            self.cancel.child_token(),
        ));
        *self.driver.lock().await = Some(handle);
        Ok(negotiated)
    }

    async fn handshake<T: Transport>(&self, transport: &mut T) -> Result<Negotiated> {
        let mut machine = HandshakeMachine::new(&self.config)?;
        let request = machine.start()?;
        self.publish_state(machine.state());
        let result = self.drive_handshake(&mut machine, transport, request).await;
        result.map_err(|e| {
            let e = machine.fail(e);
            self.publish_state(machine.state());
            e
        })
    }

    async fn drive_handshake<T: Transport>(
        &self,
        machine: &mut HandshakeMachine,
        transport: &mut T,
        request: ConnectionParams,
    ) -> Result<Negotiated> {
        let step_timeout = self.config.connect_timeout;
        send_within(
            transport,
            TransportFrame::ConnectionRequest(request),
            step_timeout,
        )
        .await?;

        // reference and slot of the job awaiting its response
        let mut pending: Option<(u16, TransactionGuard)> = None;
        loop {
            let frame = timeout(step_timeout, transport.next())
                .await
                .map_err(|_| Error::ErrConnectTimeout)?
                .ok_or(Error::ErrUseClosedConnection)??;
            if let (TransportFrame::Data(pdu), Some((expected, _))) = (&frame, &pending) {
                if pdu.pdu_ref() != *expected {
                    debug!(pdu_ref = pdu.pdu_ref(), expected, "Ignoring stale response");
                    continue;
                }
            }
            // the response releases its slot
            drop(pending.take());

            let before = machine.state();
            let action = machine.advance(frame)?;
            if before == ConnectionState::AwaitingSessionSetup {
                if let Some(setup) = machine.setup() {
                    self.transactions.set_capacity(
                        self.config
                            .max_concurrent_requests
                            .min(setup.amq_callee as usize),
                    );
                }
            }
            self.publish_state(machine.state());

            let pdu = match action {
                Action::Complete(negotiated) => return Ok(negotiated),
                Action::SendSetup(proposal) => build_setup_comm(self.next_pdu_ref(), proposal)?,
                Action::SendIdentify => {
                    build_read_szl(self.next_pdu_ref(), SZL_MODULE_ID, SZL_MODULE_ID_INDEX)?
                }
            };
            let guard = self.transactions.acquire().await?;
            pending = Some((pdu.pdu_ref(), guard));
            send_within(transport, TransportFrame::Data(pdu), step_timeout).await?;
        }
    }

    /// Close the connection. Pending and future requests fail.
    ///
    /// The transaction manager is shut down before the transport is closed.
    #[instrument(level = "debug", skip_all)]
    pub async fn disconnect(&self) {
        self.transactions.shutdown();
        self.cancel.cancel();
        self.request_tx.store(None);
        let handle = self.driver.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Connection driver ended abnormally");
            }
        }
        self.publish_state(ConnectionState::Disconnected);
    }
}

/// Reads and writes
impl Session {
    /// Read named tags. Per-tag failures are reported in the response;
    /// protocol and transport failures fail the whole read.
    #[instrument(level = "debug", skip_all, fields(tags = request.len()))]
    pub async fn read(&self, request: &ReadRequest) -> Result<ReadResponse> {
        strings::read(self, request).await
    }

    /// Write named tag values and report one status per name.
    #[instrument(level = "debug", skip_all, fields(tags = request.len()))]
    pub async fn write(&self, request: &WriteRequest) -> Result<WriteResponse> {
        strings::write(self, request).await
    }

    fn require_negotiated(&self) -> Result<Negotiated> {
        if !self.is_connected() {
            return Err(Error::ErrNotActive);
        }
        self.negotiated().ok_or(Error::ErrNotActive)
    }

    /// Send one job and await its correlated response.
    async fn exchange<F>(&self, build: F) -> Result<S7Pdu>
    where
        F: FnOnce(u16) -> Result<S7Pdu> + Send,
    {
        if !self.is_connected() {
            return Err(Error::ErrNotActive);
        }
        let pdu = build(self.next_pdu_ref())?;
        let guard = self.transactions.acquire().await?;

        let sender = self
            .request_tx
            .load_full()
            .ok_or(Error::ErrUseClosedConnection)?;
        let (tx, rx) = oneshot::channel();
        sender
            .send(SessionRequest {
                pdu,
                timeout: self.config.read_timeout,
                response_tx: tx,
                guard,
            })
            .await
            .map_err(|_| Error::ErrUseClosedConnection)?;

        // the driver answers on our behalf on timeout and teardown
        rx.await.map_err(|_| Error::ErrUseClosedConnection)?
    }

    async fn run_read_job(&self, plan: &ReadPlan, job: &ReadJob) -> Result<Vec<(usize, RawItem)>> {
        match job {
            ReadJob::Var(indices) => {
                let specs = indices
                    .iter()
                    .map(|&i| {
                        plan.entries
                            .get_index(i)
                            .and_then(|(_, tag)| tag.var_spec())
                            .ok_or(Error::ProtocolViolation {
                                context: "read frame references a system tag",
                            })
                    })
                    .collect::<Result<Vec<S7VarSpec>>>()?;
                let pdu = self.exchange(|r| build_read_var(r, &specs)).await?;
                let items = read_var_items(&pdu, indices.len())?;
                Ok(indices.iter().copied().zip(items).collect())
            }
            ReadJob::System(index) => {
                let pdu = match plan.entries.get_index(*index) {
                    Some((_, Tag::Szl { id, index })) => {
                        let (id, index) = (*id, *index);
                        self.exchange(move |r| build_read_szl(r, id, index)).await?
                    }
                    Some((_, Tag::Clock)) => self.exchange(build_read_clock).await?,
                    _ => {
                        return Err(Error::ProtocolViolation {
                            context: "system job references a non-system tag",
                        })
                    }
                };
                Ok(vec![(*index, user_data_item(&pdu)?)])
            }
        }
    }

    async fn run_write_frame(
        &self,
        plan: &WritePlan,
        frame: &[usize],
    ) -> Result<Vec<(usize, ResponseCode)>> {
        let items = frame
            .iter()
            .map(|&i| {
                plan.items
                    .get(i)
                    .map(|it| (it.spec, it.data.clone()))
                    .ok_or(Error::ProtocolViolation {
                        context: "write frame references a missing item",
                    })
            })
            .collect::<Result<Vec<(S7VarSpec, Bytes)>>>()?;
        let pdu = self.exchange(|r| build_write_var(r, &items)).await?;
        let codes = write_var_codes(&pdu, frame.len())?;
        Ok(frame.iter().copied().zip(codes).collect())
    }
}

#[async_trait]
impl TagAccess for Session {
    async fn read_tags(&self, request: &ReadRequest) -> Result<ReadResponse> {
        if request.is_empty() {
            return Ok(ReadResponse::new());
        }
        let negotiated = self.require_negotiated()?;
        let planner = self.config.optimizer.planner(negotiated.setup.pdu_len);
        let plan = ReadPlan::new(request, &planner)?;

        let answers =
            try_join_all(plan.jobs.iter().map(|job| self.run_read_job(&plan, job))).await?;
        let mut raw: Vec<Option<RawItem>> = vec![None; plan.entries.len()];
        for (index, item) in answers.into_iter().flatten() {
            if let Some(slot) = raw.get_mut(index) {
                *slot = Some(item);
            }
        }
        let raw = raw
            .into_iter()
            .map(|r| {
                r.ok_or(Error::ProtocolViolation {
                    context: "read plan left an entry unanswered",
                })
            })
            .collect::<Result<Vec<_>>>()?;
        plan.merge(request, raw, negotiated.cpu)
    }

    async fn write_tags(&self, request: &WriteRequest) -> Result<WriteResponse> {
        if request.is_empty() {
            return Ok(WriteResponse::new());
        }
        let negotiated = self.require_negotiated()?;
        let planner = self.config.optimizer.planner(negotiated.setup.pdu_len);
        let plan = WritePlan::new(request, &planner, negotiated.cpu)?;

        let answers = try_join_all(
            plan.frames
                .iter()
                .map(|frame| self.run_write_frame(&plan, frame)),
        )
        .await?;
        let mut codes: Vec<Option<ResponseCode>> = vec![None; plan.items.len()];
        for (index, code) in answers.into_iter().flatten() {
            if let Some(slot) = codes.get_mut(index) {
                *slot = Some(code);
            }
        }
        let codes = codes
            .into_iter()
            .map(|c| {
                c.ok_or(Error::ProtocolViolation {
                    context: "write plan left an item unanswered",
                })
            })
            .collect::<Result<Vec<_>>>()?;
        plan.merge(request, codes)
    }
}

/// Per-tag status for a header-level rejection of a whole job.
fn header_error_code(error: S7HeaderError, items: usize) -> ResponseCode {
    match error {
        S7HeaderError::FEATURE_NOT_ENABLED => {
            warn!(%error, items, "Device denied access, PUT/GET may be disabled");
            ResponseCode::AccessDenied
        }
        S7HeaderError::PDU_SIZE_EXCEEDED => {
            error!(%error, items, "Device rejected an oversize request");
            ResponseCode::AccessDenied
        }
        _ => {
            warn!(%error, items, "Device rejected request");
            ResponseCode::InternalError
        }
    }
}

fn read_var_items(pdu: &S7Pdu, expected: usize) -> Result<Vec<RawItem>> {
    let error = pdu.header_error();
    if !error.is_ok() {
        let code = header_error_code(error, expected);
        return Ok(vec![RawItem::failed(code); expected]);
    }
    let view = pdu.as_ref_view()?;
    let S7PayloadRef::ReadVarResponse(payload) = view.payload else {
        return Err(Error::ErrUnexpectedPdu);
    };
    if payload.item_count as usize != expected {
        return Err(Error::ItemCountMismatch {
            expected,
            actual: payload.item_count as usize,
        });
    }
    payload
        .iter_data_items()
        .map(|item| {
            item.map(|it| {
                if it.return_code == S7ReturnCode::Success {
                    RawItem::ok(pdu.payload.slice_ref(it.data))
                } else {
                    RawItem::failed(it.return_code.into())
                }
            })
        })
        .collect()
}

fn write_var_codes(pdu: &S7Pdu, expected: usize) -> Result<Vec<ResponseCode>> {
    let error = pdu.header_error();
    if !error.is_ok() {
        let code = header_error_code(error, expected);
        return Ok(vec![code; expected]);
    }
    let view = pdu.as_ref_view()?;
    let S7PayloadRef::WriteVarResponse(payload) = view.payload else {
        return Err(Error::ErrUnexpectedPdu);
    };
    if payload.item_count as usize != expected {
        return Err(Error::ItemCountMismatch {
            expected,
            actual: payload.item_count as usize,
        });
    }
    payload
        .iter_status_items()
        .map(|code| code.map(ResponseCode::from))
        .collect()
}

fn user_data_item(pdu: &S7Pdu) -> Result<RawItem> {
    let view = pdu.as_ref_view()?;
    let S7PayloadRef::UserData(payload) = view.payload else {
        return Err(Error::ErrUnexpectedPdu);
    };
    let item = payload
        .iter_user_data_items()
        .next()
        .ok_or(Error::ItemCountMismatch {
            expected: 1,
            actual: 0,
        })??;
    if item.return_code == S7ReturnCode::Success {
        Ok(RawItem::ok(pdu.payload.slice_ref(item.data)))
    } else {
        Ok(RawItem::failed(item.return_code.into()))
    }
}

async fn send_within<T: Transport>(
    transport: &mut T,
    frame: TransportFrame,
    limit: Duration,
) -> Result<()> {
    timeout(limit, transport.send(frame))
        .await
        .map_err(|_| Error::ErrConnectTimeout)?
}

/// Connection driver: moves requests to the wire and routes responses back
/// by PDU reference until cancelled or the connection drops.
async fn run_connection<T: Transport>(
    session: Arc<Session>,
    transport: T,
    mut request_rx: mpsc::Receiver<SessionRequest>,
    cancel: CancellationToken,
) {
    let (mut sink, mut stream) = transport.split();
    let mut inflight: HashMap<u16, InflightEntry> = HashMap::with_capacity(64);
    let mut timeouts = BTreeMap::<Instant, Vec<u16>>::new();
    // Reusable sleep future to avoid per-iteration allocation
    let mut deadline_sleep = Box::pin(sleep(IDLE_DEADLINE));

    let lost = loop {
        match timeouts.keys().next() {
            Some(deadline) => deadline_sleep.as_mut().reset(*deadline),
            None => deadline_sleep.as_mut().reset(Instant::now() + IDLE_DEADLINE),
        }
        select! {
            biased;
            _ = cancel.cancelled() => break false,
            req = request_rx.recv() => {
                match req {
                    Some(request) => {
                        let (pdu_ref, pdu) =
                            register_inflight_request(request, &mut inflight, &mut timeouts);
                        if let Err(e) = sink.send(TransportFrame::Data(pdu)).await {
                            warn!(error = %e, pdu_ref, "Failed to send request");
                            handle_send_failure(pdu_ref, &mut inflight);
                        }
                    }
                    None => break false,
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(TransportFrame::Data(pdu))) => route_response(pdu, &mut inflight),
                    Some(Ok(TransportFrame::Disconnect)) | None => {
                        warn!(inflight = inflight.len(), "Connection lost");
                        break true;
                    }
                    Some(Ok(other)) => debug!(frame = ?other, "Ignoring unexpected transport frame"),
                    Some(Err(e)) => {
                        warn!(error = %e, "Transport error");
                        if e.is_fatal_for_connection() {
                            break true;
                        }
                    }
                }
            }
            _ = &mut deadline_sleep => {
                handle_request_timeouts(&mut timeouts, &mut inflight);
            }
        }
    };

    for (_, entry) in inflight.drain() {
        let _ = entry.tx.send(Err(Error::ErrUseClosedConnection));
    }
    // a local close, whether seen as cancellation or as the closed request queue
    if !lost {
        if let Err(e) = sink.send(TransportFrame::Disconnect).await {
            debug!(error = %e, "Disconnect notice not delivered");
        }
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Closing transport");
    }
    if lost {
        session.transactions.shutdown();
        session.request_tx.store(None);
    }
    session.publish_state(ConnectionState::Disconnected);
}

/// Track a request as inflight and schedule its deadline.
#[inline]
fn register_inflight_request(
    request: SessionRequest,
    inflight: &mut HashMap<u16, InflightEntry>,
    timeouts: &mut BTreeMap<Instant, Vec<u16>>,
) -> (u16, S7Pdu) {
    let SessionRequest {
        pdu,
        timeout,
        response_tx,
        guard,
    } = request;
    let pdu_ref = pdu.pdu_ref();
    let entry = InflightEntry {
        tx: response_tx,
        _guard: guard,
    };
    if let Some(previous) = inflight.insert(pdu_ref, entry) {
        warn!(pdu_ref, "PDU reference reused while still in flight");
        let _ = previous.tx.send(Err(Error::ProtocolViolation {
            context: "PDU reference reused while in flight",
        }));
    }
    timeouts
        .entry(Instant::now() + timeout)
        .or_default()
        .push(pdu_ref);
    (pdu_ref, pdu)
}

#[inline]
fn handle_send_failure(pdu_ref: u16, inflight: &mut HashMap<u16, InflightEntry>) {
    if let Some(entry) = inflight.remove(&pdu_ref) {
        let _ = entry.tx.send(Err(Error::ErrUseClosedConnection));
    }
}

#[inline]
fn route_response(pdu: S7Pdu, inflight: &mut HashMap<u16, InflightEntry>) {
    let pdu_ref = pdu.pdu_ref();
    match inflight.remove(&pdu_ref) {
        Some(entry) => {
            let _ = entry.tx.send(Ok(pdu));
        }
        None => debug!(pdu_ref, "Dropping response without a pending request"),
    }
}

/// Fail every inflight request whose deadline has passed.
#[inline]
fn handle_request_timeouts(
    timeouts: &mut BTreeMap<Instant, Vec<u16>>,
    inflight: &mut HashMap<u16, InflightEntry>,
) {
    let now = Instant::now();
    let expired: Vec<Instant> = timeouts
        .keys()
        .take_while(|d| **d <= now)
        .copied()
        .collect();

    for deadline in expired {
        if let Some(keys) = timeouts.remove(&deadline) {
            for key in keys {
                if let Some(entry) = inflight.remove(&key) {
                    warn!(pdu_ref = key, "Request timed out");
                    let _ = entry.tx.send(Err(Error::ErrRequestTimeout));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        super::{
            frame::{
                build_ack_error, build_ack_read_var, build_ack_setup_comm, build_ack_write_var,
                build_user_data_response, CpuFunctionGroup, CpuType, DataItemOwned, S7Area,
                S7DataVariableType, S7JobParamRef, S7ParamRef, S7TransportSize,
                S7UserDataParamRef, SetupParam,
            },
            request::ReadItem,
            tag::{Address, DataType, StringKind},
            transport::{channel_pair, ChannelTransport},
            value::Value,
        },
        handshake::tests::{identify_response, szl_module_id},
        *,
    };
    use std::sync::{atomic::AtomicUsize, Mutex as StdMutex};
    use tracing::Level;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    }

    const CLOCK: [u8; 10] = [0x00, 0x20, 0x24, 0x01, 0x02, 0x03, 0x04, 0x05, 0x00, 0x04];

    /// Simulated device serving one flat memory image for every area.
    struct Device {
        memory: StdMutex<Vec<u8>>,
        setup: SetupParam,
        article: &'static str,
        header_error: Option<S7HeaderError>,
        drop_last_item: bool,
        silent: bool,
        delay: Duration,
        outstanding: AtomicUsize,
        max_outstanding: AtomicUsize,
        jobs: StdMutex<Vec<S7Pdu>>,
        disconnects: AtomicUsize,
    }

    impl Default for Device {
        fn default() -> Self {
            Self {
                memory: StdMutex::new(vec![0u8; 1024]),
                setup: SetupParam {
                    amq_caller: 8,
                    amq_callee: 8,
                    pdu_len: 480,
                },
                article: "6ES7 511-1AK02-0AB0",
                header_error: None,
                drop_last_item: false,
                silent: false,
                delay: Duration::ZERO,
                outstanding: AtomicUsize::new(0),
                max_outstanding: AtomicUsize::new(0),
                jobs: StdMutex::new(Vec::new()),
                disconnects: AtomicUsize::new(0),
            }
        }
    }

    impl Device {
        fn poke(&self, offset: usize, bytes: &[u8]) {
            self.memory.lock().unwrap()[offset..offset + bytes.len()].copy_from_slice(bytes);
        }

        fn peek(&self, offset: usize, len: usize) -> Vec<u8> {
            self.memory.lock().unwrap()[offset..offset + len].to_vec()
        }

        fn read_jobs(&self) -> Vec<Vec<S7VarSpec>> {
            self.jobs
                .lock()
                .unwrap()
                .iter()
                .filter_map(|pdu| match pdu.as_ref_view().unwrap().param {
                    S7ParamRef::Job(S7JobParamRef::ReadVarRequest(items)) => Some(
                        items
                            .iter_specs()
                            .collect::<Result<Vec<_>>>()
                            .unwrap(),
                    ),
                    _ => None,
                })
                .collect()
        }

        fn respond(&self, pdu: &S7Pdu) -> Option<S7Pdu> {
            self.jobs.lock().unwrap().push(pdu.clone());
            let r = pdu.pdu_ref();
            let view = pdu.as_ref_view().unwrap();
            match view.param {
                S7ParamRef::Job(S7JobParamRef::SetupCommunication(p)) => {
                    let negotiated = SetupParam {
                        amq_caller: p.amq_caller.min(self.setup.amq_caller),
                        amq_callee: p.amq_callee.min(self.setup.amq_callee),
                        pdu_len: p.pdu_len.min(self.setup.pdu_len),
                    };
                    Some(build_ack_setup_comm(r, negotiated).unwrap())
                }
                _ if self.silent => None,
                _ if self.header_error.is_some() => {
                    Some(build_ack_error(r, self.header_error.unwrap()))
                }
                S7ParamRef::Job(S7JobParamRef::ReadVarRequest(items)) => {
                    let memory = self.memory.lock().unwrap();
                    let mut data: Vec<DataItemOwned> = items
                        .iter_specs()
                        .map(|spec| {
                            let spec = spec.unwrap();
                            let start = spec.byte_address as usize;
                            match memory.get(start..start + spec.data_len()) {
                                Some(bytes) => DataItemOwned {
                                    return_code: S7ReturnCode::Success,
                                    transport_size: spec.transport_size.write_variable_type(),
                                    data: if spec.transport_size == S7TransportSize::Bit {
                                        Bytes::from(vec![(bytes[0] >> spec.bit_index) & 1])
                                    } else {
                                        Bytes::copy_from_slice(bytes)
                                    },
                                },
                                None => DataItemOwned {
                                    return_code: S7ReturnCode::AddressOutOfRange,
                                    transport_size: S7DataVariableType::Null,
                                    data: Bytes::new(),
                                },
                            }
                        })
                        .collect();
                    if self.drop_last_item {
                        data.pop();
                    }
                    Some(build_ack_read_var(r, data).unwrap())
                }
                S7ParamRef::Job(S7JobParamRef::WriteVarRequest(items)) => {
                    let S7PayloadRef::WriteVarRequest(payload) = view.payload else {
                        panic!("write without payload");
                    };
                    let mut memory = self.memory.lock().unwrap();
                    let codes = items
                        .iter_specs()
                        .zip(payload.iter_data_items())
                        .map(|(spec, item)| {
                            let (spec, item) = (spec.unwrap(), item.unwrap());
                            let start = spec.byte_address as usize;
                            let Some(dst) = memory.get_mut(start..start + item.data.len()) else {
                                return S7ReturnCode::AddressOutOfRange;
                            };
                            if spec.transport_size == S7TransportSize::Bit {
                                let mask = 1u8 << spec.bit_index;
                                dst[0] = if item.data[0] != 0 {
                                    dst[0] | mask
                                } else {
                                    dst[0] & !mask
                                };
                            } else {
                                dst.copy_from_slice(item.data);
                            }
                            S7ReturnCode::Success
                        })
                        .collect();
                    Some(build_ack_write_var(r, codes).unwrap())
                }
                S7ParamRef::UserData(S7UserDataParamRef::CpuService(param)) => {
                    let item = param.iter_items().next().unwrap().unwrap();
                    if item.cpu_function_group == CpuFunctionGroup::TimeFunctions {
                        Some(
                            build_user_data_response(
                                r,
                                CpuFunctionGroup::TimeFunctions,
                                0x01,
                                DataItemOwned {
                                    return_code: S7ReturnCode::Success,
                                    transport_size: S7DataVariableType::OctetString,
                                    data: Bytes::from_static(&CLOCK),
                                },
                            )
                            .unwrap(),
                        )
                    } else {
                        Some(identify_response(r, szl_module_id(self.article)))
                    }
                }
                _ => None,
            }
        }
    }

    async fn serve(server: ChannelTransport, device: Arc<Device>) {
        let (mut sink, mut stream) = server.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<TransportFrame>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
        });
        while let Some(Ok(frame)) = stream.next().await {
            match frame {
                TransportFrame::ConnectionRequest(params) => {
                    let _ = out_tx.send(TransportFrame::ConnectionConfirm(params));
                }
                TransportFrame::Data(pdu) => {
                    let Some(resp) = device.respond(&pdu) else {
                        continue;
                    };
                    let now = device.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
                    device.max_outstanding.fetch_max(now, Ordering::SeqCst);
                    let out = out_tx.clone();
                    let dev = Arc::clone(&device);
                    tokio::spawn(async move {
                        sleep(dev.delay).await;
                        dev.outstanding.fetch_sub(1, Ordering::SeqCst);
                        let _ = out.send(TransportFrame::Data(resp));
                    });
                }
                TransportFrame::Disconnect => {
                    device.disconnects.fetch_add(1, Ordering::SeqCst);
                    break;
                }
                TransportFrame::ConnectionConfirm(_) => {}
            }
        }
        drop(out_tx);
        let _ = writer.await;
    }

    fn known_cpu() -> SessionConfig {
        SessionConfig {
            cpu: Some(CpuType::S71500),
            ..Default::default()
        }
    }

    async fn connected(config: SessionConfig, device: Device) -> (Arc<Session>, Arc<Device>) {
        init_tracing();
        let device = Arc::new(device);
        let (client, server) = channel_pair(16);
        tokio::spawn(serve(server, Arc::clone(&device)));
        let session = Session::new(config);
        session.connect(client).await.unwrap();
        (session, device)
    }

    #[tokio::test]
    async fn handshake_with_known_family() {
        let device = Device {
            setup: SetupParam {
                amq_caller: 2,
                amq_callee: 3,
                pdu_len: 240,
            },
            ..Default::default()
        };
        let (session, device) = connected(known_cpu(), device).await;

        assert_eq!(session.state(), ConnectionState::Connected);
        let n = session.negotiated().unwrap();
        assert_eq!(n.setup.pdu_len, 240);
        assert_eq!(n.cpu, CpuType::S71500);
        assert_eq!(session.transactions.capacity(), 3);
        // setup only, no identify
        assert_eq!(device.jobs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn handshake_identifies_family() {
        let device = Device {
            article: "6ES7 214-1AG40-0XB0",
            ..Default::default()
        };
        let (session, device) = connected(SessionConfig::default(), device).await;
        assert_eq!(session.negotiated().unwrap().cpu, CpuType::S71200);
        assert_eq!(device.jobs.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn capacity_is_bounded_by_caller_limit() {
        let config = SessionConfig {
            max_concurrent_requests: 2,
            ..known_cpu()
        };
        let (session, _device) = connected(config, Device::default()).await;
        assert_eq!(session.transactions.capacity(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_is_fatal() {
        init_tracing();
        let (client, mut server) = channel_pair(4);
        let session = Session::new(known_cpu());
        let connecting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.connect(client).await })
        };
        // the request arrives, the confirm never does
        assert!(matches!(
            server.next().await,
            Some(Ok(TransportFrame::ConnectionRequest(_)))
        ));

        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(
            &err,
            Error::Handshake { state: ConnectionState::AwaitingTransportConnect, source }
                if matches!(**source, Error::ErrConnectTimeout)
        ));
        assert!(err.is_fatal_for_connection());
        assert_eq!(session.state(), ConnectionState::Failed);
        assert!(session.transactions.is_shutdown());
        assert!(server.next().await.is_none());
    }

    #[tokio::test]
    async fn rejected_setup_fails_connect() {
        init_tracing();
        let (client, mut server) = channel_pair(4);
        let session = Session::new(known_cpu());
        let device = tokio::spawn(async move {
            let Some(Ok(TransportFrame::ConnectionRequest(p))) = server.next().await else {
                panic!("expected connection request");
            };
            server.send(TransportFrame::ConnectionConfirm(p)).await.unwrap();
            let Some(Ok(TransportFrame::Data(setup))) = server.next().await else {
                panic!("expected setup");
            };
            let nack = build_ack_error(setup.pdu_ref(), S7HeaderError::new(0x81, 0x04));
            server.send(TransportFrame::Data(nack)).await.unwrap();
            server
        });
        let err = session.connect(client).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Handshake {
                state: ConnectionState::AwaitingSessionSetup,
                ..
            }
        ));
        let _ = device.await;
    }

    #[tokio::test]
    async fn mixed_read() {
        let (session, device) = connected(known_cpu(), Device::default()).await;
        device.poke(0, &[0x01, 0x2C]);
        device.poke(4, &0.5f32.to_be_bytes());
        device.poke(8, &[0b0000_0100]);
        let mut field = vec![254u8, 5];
        field.extend_from_slice(b"hello");
        device.poke(100, &field);

        let request = ReadRequest::new()
            .with("int", Tag::simple(Address::db(1, 0), DataType::Int, 1))
            .unwrap()
            .with("real", Tag::simple(Address::db(1, 4), DataType::Real, 1))
            .unwrap()
            .with("flag", Tag::bool(Address::db(1, 8).with_bit(2)))
            .unwrap()
            .with("name", Tag::var_string(Address::db(1, 100), StringKind::String))
            .unwrap()
            .with("clock", Tag::Clock)
            .unwrap()
            .with("missing", Tag::simple(Address::db(1, 5000), DataType::Word, 1))
            .unwrap();
        let response = session.read(&request).await.unwrap();

        assert_eq!(
            response.keys().collect::<Vec<_>>(),
            ["int", "real", "flag", "name", "clock", "missing"]
        );
        assert_eq!(response.get("int").unwrap().value, Value::Int(300));
        assert_eq!(response.get("real").unwrap().value, Value::Real(0.5));
        assert_eq!(response.get("flag").unwrap().value, Value::Bool(true));
        assert_eq!(response.get("name").unwrap().value, Value::String("hello".into()));
        assert!(matches!(response.get("clock").unwrap().value, Value::DateTime(_)));
        assert_eq!(
            response.get("missing").unwrap(),
            &ReadItem::failed(ResponseCode::InvalidAddress)
        );

        // the second string phase asks for exactly the five characters present
        let jobs = device.read_jobs();
        let last = jobs.last().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].data_len(), 5 + 2);
        assert_eq!(last[0].byte_address, 100);
    }

    #[tokio::test]
    async fn large_reads_are_split_and_reassembled() {
        let device = Device {
            setup: SetupParam {
                amq_caller: 4,
                amq_callee: 4,
                pdu_len: 240,
            },
            ..Default::default()
        };
        let (session, device) = connected(known_cpu(), device).await;
        let pattern: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        device.poke(0, &pattern);

        let request = ReadRequest::new()
            .with("blob", Tag::simple(Address::db(1, 0), DataType::Byte, 600))
            .unwrap();
        let response = session.read(&request).await.unwrap();
        assert_eq!(
            response.get("blob").unwrap().value,
            Value::Bytes(Bytes::from(pattern))
        );
        assert!(device.read_jobs().len() >= 3);
        for job in device.read_jobs() {
            let payload: usize = job.iter().map(|s| s.data_len() + 4).sum();
            assert!(12 + 2 + payload <= 240);
        }
    }

    #[tokio::test]
    async fn writes_reach_the_device() {
        let (session, device) = connected(known_cpu(), Device::default()).await;
        device.poke(20, &[16, 3, b'a', b'b', b'c']);
        let request = WriteRequest::new()
            .with(
                "int",
                (Tag::simple(Address::db(1, 0), DataType::Int, 1), Value::Int(-1)),
            )
            .unwrap()
            .with("flag", (Tag::bool(Address::db(1, 2).with_bit(3)), Value::Bool(true)))
            .unwrap()
            .with(
                "name",
                (
                    Tag::var_string(Address::db(1, 20), StringKind::String),
                    Value::from("xy"),
                ),
            )
            .unwrap()
            .with(
                "far",
                (Tag::simple(Address::db(1, 4000), DataType::Int, 1), Value::Int(1)),
            )
            .unwrap();
        let response = session.write(&request).await.unwrap();

        assert_eq!(response.get("int"), Some(&ResponseCode::Ok));
        assert_eq!(response.get("flag"), Some(&ResponseCode::Ok));
        assert_eq!(response.get("name"), Some(&ResponseCode::Ok));
        assert_eq!(response.get("far"), Some(&ResponseCode::InvalidAddress));
        assert_eq!(device.peek(0, 3), [0xFF, 0xFF, 0b0000_1000]);
        assert_eq!(device.peek(20, 4), [16, 2, b'x', b'y']);
        // written with the declared 16-character capacity
        assert_eq!(device.peek(24, 14), [0u8; 14]);
    }

    #[tokio::test]
    async fn header_errors_become_tag_statuses() {
        let cases = [
            (S7HeaderError::FEATURE_NOT_ENABLED, ResponseCode::AccessDenied),
            (S7HeaderError::PDU_SIZE_EXCEEDED, ResponseCode::AccessDenied),
            (S7HeaderError::new(0x87, 0x01), ResponseCode::InternalError),
        ];
        for (header_error, want) in cases {
            let device = Device {
                header_error: Some(header_error),
                ..Default::default()
            };
            let (session, _device) = connected(known_cpu(), device).await;
            let read = ReadRequest::new()
                .with("a", Tag::simple(Address::db(1, 0), DataType::Int, 1))
                .unwrap()
                .with("b", Tag::simple(Address::new(S7Area::M, 0, 10, 0), DataType::Word, 1))
                .unwrap();
            let response = session.read(&read).await.unwrap();
            assert!(response.values().all(|item| item.code == want), "{header_error}");
            assert!(response.values().all(|item| item.value.is_null()));

            let write = WriteRequest::new()
                .with(
                    "a",
                    (Tag::simple(Address::db(1, 0), DataType::Int, 1), Value::Int(1)),
                )
                .unwrap();
            let response = session.write(&write).await.unwrap();
            assert_eq!(response.get("a"), Some(&want));
            session.disconnect().await;
        }
    }

    #[tokio::test]
    async fn item_count_mismatch_fails_the_read() {
        let device = Device {
            drop_last_item: true,
            ..Default::default()
        };
        let (session, _device) = connected(known_cpu(), device).await;
        let request = ReadRequest::new()
            .with("a", Tag::simple(Address::db(1, 0), DataType::Int, 1))
            .unwrap()
            .with("b", Tag::simple(Address::new(S7Area::M, 0, 0, 0), DataType::Int, 1))
            .unwrap();
        assert!(matches!(
            session.read(&request).await,
            Err(Error::ItemCountMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_release_the_slot() {
        let device = Device {
            silent: true,
            ..Default::default()
        };
        let config = SessionConfig {
            read_timeout: Duration::from_millis(200),
            ..known_cpu()
        };
        let (session, _device) = connected(config, device).await;
        let request = ReadRequest::new()
            .with("a", Tag::simple(Address::db(1, 0), DataType::Int, 1))
            .unwrap();
        assert!(matches!(
            session.read(&request).await,
            Err(Error::ErrRequestTimeout)
        ));
        assert_eq!(
            session.transactions.available(),
            session.transactions.capacity()
        );
        assert!(session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn admission_is_bounded_by_negotiated_queue() {
        let device = Device {
            setup: SetupParam {
                amq_caller: 2,
                amq_callee: 2,
                pdu_len: 480,
            },
            delay: Duration::from_millis(20),
            ..Default::default()
        };
        let (session, device) = connected(known_cpu(), device).await;
        device.max_outstanding.store(0, Ordering::SeqCst);

        let requests: Vec<ReadRequest> = (0..5u32)
            .map(|i| {
                ReadRequest::new()
                    .with("v", Tag::simple(Address::db(1, i * 2), DataType::Int, 1))
                    .unwrap()
            })
            .collect();
        let results = futures::future::join_all(requests.iter().map(|r| session.read(r))).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(device.max_outstanding.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn connection_loss_fails_inflight_requests() {
        init_tracing();
        let (client, mut server) = channel_pair(4);
        let session = Session::new(known_cpu());
        let device = tokio::spawn(async move {
            let Some(Ok(TransportFrame::ConnectionRequest(p))) = server.next().await else {
                panic!("expected connection request");
            };
            server.send(TransportFrame::ConnectionConfirm(p)).await.unwrap();
            let Some(Ok(TransportFrame::Data(setup))) = server.next().await else {
                panic!("expected setup");
            };
            let ack = build_ack_setup_comm(
                setup.pdu_ref(),
                SetupParam {
                    amq_caller: 1,
                    amq_callee: 1,
                    pdu_len: 240,
                },
            )
            .unwrap();
            server.send(TransportFrame::Data(ack)).await.unwrap();
            // swallow the read, then drop the connection
            let _ = server.next().await;
        });
        session.connect(client).await.unwrap();
        let mut state = session.subscribe_state();

        let request = ReadRequest::new()
            .with("a", Tag::simple(Address::db(1, 0), DataType::Int, 1))
            .unwrap();
        assert!(matches!(
            session.read(&request).await,
            Err(Error::ErrUseClosedConnection)
        ));
        device.await.unwrap();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert!(matches!(
            session.read(&request).await,
            Err(Error::ErrNotActive)
        ));
    }

    #[tokio::test]
    async fn disconnect_closes_everything() {
        let (session, _device) = connected(known_cpu(), Device::default()).await;
        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.transactions.is_shutdown());
        let request = ReadRequest::new()
            .with("a", Tag::simple(Address::db(1, 0), DataType::Int, 1))
            .unwrap();
        assert!(matches!(
            session.read(&request).await,
            Err(Error::ErrNotActive)
        ));
        assert!(matches!(
            session.connect(channel_pair(1).0).await,
            Err(Error::ErrUseClosedConnection)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_always_notifies_the_device() {
        init_tracing();
        for _ in 0..25 {
            let device = Arc::new(Device::default());
            let (client, server) = channel_pair(16);
            let served = tokio::spawn(serve(server, Arc::clone(&device)));
            let session = Session::new(known_cpu());
            session.connect(client).await.unwrap();

            session.disconnect().await;
            // the device task ends on the notice or, without one, on end of stream
            served.await.unwrap();
            assert_eq!(device.disconnects.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn pdu_refs_wrap_and_skip_zero() {
        let session = Session::new(SessionConfig::default());
        assert_eq!(session.next_pdu_ref(), 1);
        session.pdu_ref_counter.store(u16::MAX - 1, Ordering::Relaxed);
        assert_eq!(session.next_pdu_ref(), u16::MAX);
        assert_eq!(session.next_pdu_ref(), 1);
        assert_eq!(session.next_pdu_ref(), 2);
    }

    #[tokio::test]
    async fn empty_requests_need_no_connection_round_trip() {
        let (session, device) = connected(known_cpu(), Device::default()).await;
        let jobs = device.jobs.lock().unwrap().len();
        assert!(session.read(&ReadRequest::new()).await.unwrap().is_empty());
        assert!(session.write(&WriteRequest::new()).await.unwrap().is_empty());
        assert_eq!(device.jobs.lock().unwrap().len(), jobs);
    }
}
