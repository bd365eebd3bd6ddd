//! User application execution (spec §4.3.7): applying committed
//! requests to replicated state, off the async runtime's thread pool,
//! and producing the reply sent back to the client.

use std::sync::mpsc;
use std::thread;

use crate::bft::async_runtime as rt;
use crate::bft::communication::channel::MessageChannelTx;
use crate::bft::communication::message::{ClientId, Message, ReplyMessage, Timestamp};
use crate::bft::communication::serialize::SharedData;
use crate::bft::communication::NodeId;
use crate::bft::error::*;
use crate::bft::ordering::SeqNo;

/// State type of the `Service`.
pub type State<S> = <<S as Service>::Data as SharedData>::State;

/// Request type of the `Service`.
pub type Request<S> = <<S as Service>::Data as SharedData>::Request;

/// Reply type of the `Service`.
pub type Reply<S> = <<S as Service>::Data as SharedData>::Reply;

/// A user-defined state machine replicated by the cluster.
///
/// Application logic is implemented by this trait; the protocol
/// engine only knows how to serialize its associated types and call
/// `update` once per decided sequence number.
pub trait Service {
    /// The data types used by the application and the SMR protocol,
    /// including their serialization routines.
    type Data: SharedData;

    /// Returns the initial state of the application.
    fn initial_state(&mut self) -> Result<State<Self>>;

    /// Process a user request, producing a matching reply, meanwhile
    /// updating the application state.
    ///
    /// Called exactly once per committed sequence number, in
    /// commit order (spec §4.3.6 "out-of-order execute: never").
    fn update(&mut self, state: &mut State<Self>, request: Request<Self>) -> Reply<Self>;
}

struct ExecutionRequest<O> {
    origin: NodeId,
    seq: SeqNo,
    client_id: ClientId,
    client_ts: Timestamp,
    operation: O,
}

/// Stateful data of the task responsible for executing client
/// requests, run on a dedicated OS thread so it never blocks the
/// async runtime (spec §5: "execution must not block the replica's
/// event loop").
pub struct Executor<S: Service> {
    my_id: NodeId,
    service: S,
    state: State<S>,
    e_rx: mpsc::Receiver<ExecutionRequest<Request<S>>>,
    system_tx: MessageChannelTx<Request<S>, Reply<S>>,
}

/// A handle to the client request executor, cheaply cloneable and
/// shared with the replica's main loop.
pub struct ExecutorHandle<S: Service> {
    e_tx: mpsc::Sender<ExecutionRequest<Request<S>>>,
}

impl<S: Service> Clone for ExecutorHandle<S> {
    fn clone(&self) -> Self {
        Self {
            e_tx: self.e_tx.clone(),
        }
    }
}

impl<S: Service> ExecutorHandle<S>
where
    S: Service + Send + 'static,
    Request<S>: Send + 'static,
    Reply<S>: Send + 'static,
{
    /// Queues the request at `seq`, whose reply should be routed back
    /// to `origin` on behalf of `client_id`, for execution.
    pub fn queue_update(
        &mut self,
        origin: NodeId,
        seq: SeqNo,
        client_id: ClientId,
        client_ts: Timestamp,
        operation: Request<S>,
    ) -> Result<()> {
        self.e_tx
            .send(ExecutionRequest {
                origin,
                seq,
                client_id,
                client_ts,
                operation,
            })
            .simple(ErrorKind::Executable)
    }
}

impl<S> Executor<S>
where
    S: Service + Send + 'static,
    State<S>: Send + 'static,
    Request<S>: Send + 'static,
    Reply<S>: Send + 'static,
{
    /// Spawns a new service executor, returning a handle the replica's
    /// core loop can queue decided requests on.
    pub fn new(
        my_id: NodeId,
        system_tx: MessageChannelTx<Request<S>, Reply<S>>,
        mut service: S,
    ) -> Result<ExecutorHandle<S>> {
        let (e_tx, e_rx) = mpsc::channel();

        let state = service.initial_state()?;
        let mut exec = Executor {
            my_id,
            e_rx,
            system_tx,
            service,
            state,
        };

        thread::Builder::new()
            .name("synod-executor".to_owned())
            .spawn(move || {
                while let Ok(req) = exec.e_rx.recv() {
                    let ExecutionRequest {
                        origin,
                        seq,
                        client_id,
                        client_ts,
                        operation,
                    } = req;
                    let result = exec.service.update(&mut exec.state, operation);
                    let reply = ReplyMessage::new(client_id, client_ts, exec.my_id, result);

                    let mut system_tx = exec.system_tx.clone();
                    rt::spawn(async move {
                        let m = Message::ExecutionFinished(origin, seq, reply);
                        system_tx.send(m).await.unwrap_or(());
                    });
                }
            })
            .wrapped(ErrorKind::Executable)?;

        Ok(ExecutorHandle { e_tx })
    }
}
