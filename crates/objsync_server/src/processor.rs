//! Command processor: decodes invocations and sequences every command.

use crate::broadcast::Broadcaster;
use crate::config::ProcessorConfig;
use crate::error::{SyncError, SyncResult};
use crate::hooks::{AccessPolicy, Hooks, LogMerger};
use crate::objects::ObjectStateStore;
use crate::registry::ConnectionRegistry;
use crate::transport::{push_message, PushTransport};
use objsync_protocol::{
    decode_batch, ChangeEvent, ClientConnection, Command, EvtRequest, ObjectRequest, PingRequest,
    PushMessage,
};
use objsync_store::{AppendOutcome, StateStore};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What an invocation carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationEvent {
    /// Raw message bytes: one command or a JSON array of commands.
    Message(Vec<u8>),
    /// The socket closed.
    Disconnect,
}

/// One inbound invocation from the socket gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Socket the invocation arrived on.
    pub connection_id: Option<String>,
    /// Authenticated principal, if the gateway supplies one.
    pub user_id: Option<String>,
    /// Payload.
    pub event: InvocationEvent,
}

impl Invocation {
    /// Creates a message invocation.
    pub fn message(connection_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            connection_id: Some(connection_id.into()),
            user_id: None,
            event: InvocationEvent::Message(payload.into()),
        }
    }

    /// Creates a disconnect invocation.
    pub fn disconnect(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: Some(connection_id.into()),
            user_id: None,
            event: InvocationEvent::Disconnect,
        }
    }

    /// Sets the principal.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Whether the rest of a batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Who produced a set of change events.
#[derive(Debug, Clone, Copy)]
enum EventOrigin<'a> {
    /// A client command; checked against the registry and the write hook.
    Client {
        socket_id: &'a str,
        client_id: &'a str,
    },
    /// Produced by the engine itself, e.g. disconnect cleanup.
    System,
}

/// Sockets waiting for cleanup within one invocation.
#[derive(Debug)]
struct Evictions {
    enabled: bool,
    queue: VecDeque<String>,
    seen: HashSet<String>,
}

impl Evictions {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            queue: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    fn push(&mut self, socket_id: &str) {
        if self.enabled && self.seen.insert(socket_id.to_string()) {
            self.queue.push_back(socket_id.to_string());
        }
    }

    fn mark_seen(&mut self, socket_id: &str) {
        self.seen.insert(socket_id.to_string());
    }
}

/// Stateless handler for inbound invocations.
///
/// A processor holds no per-session state: every invocation reads and
/// writes the store, so any number of processors may share one store.
pub struct CommandProcessor {
    registry: Arc<ConnectionRegistry>,
    objects: ObjectStateStore,
    broadcaster: Broadcaster,
    transport: Arc<dyn PushTransport>,
    access: Arc<dyn AccessPolicy>,
    merger: Arc<dyn LogMerger>,
    config: ProcessorConfig,
}

impl CommandProcessor {
    /// Creates a processor over `store` and `transport`.
    pub fn new(
        store: Arc<dyn StateStore>,
        transport: Arc<dyn PushTransport>,
        hooks: Hooks,
        config: ProcessorConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(store.clone(), hooks.transform));
        let objects = ObjectStateStore::new(store, hooks.default_state, config.retry.clone());
        let broadcaster = Broadcaster::new(registry.clone(), transport.clone(), config.page_size);
        Self {
            registry,
            objects,
            broadcaster,
            transport,
            access: hooks.access,
            merger: hooks.merger,
            config,
        }
    }

    /// Returns the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Returns the object state store.
    pub fn objects(&self) -> &ObjectStateStore {
        &self.objects
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Handles one invocation.
    ///
    /// Returns an error only for [`SyncError::BadRequest`] and for a failed
    /// disconnect cleanup. Everything else is logged and swallowed.
    pub fn handle(&self, invocation: &Invocation) -> SyncResult<()> {
        let socket_id = invocation
            .connection_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SyncError::BadRequest("invocation has no connection id".into()))?;

        match &invocation.event {
            InvocationEvent::Message(payload) => {
                let commands = decode_batch(payload).map_err(|err| {
                    warn!(socket_id, error = %err, "undecodable message");
                    SyncError::BadRequest(err.to_string())
                })?;
                self.handle_commands(socket_id, invocation.user_id.as_deref(), &commands)
            }
            InvocationEvent::Disconnect => self.disconnect(socket_id).map(|_| ()),
        }
    }

    /// Runs a decoded batch for `socket_id`, strictly in order.
    ///
    /// Every command is validated before the first one runs. A `ping` that
    /// asks the client to reconnect ends the batch early.
    pub fn handle_commands(
        &self,
        socket_id: &str,
        user_id: Option<&str>,
        commands: &[Command],
    ) -> SyncResult<()> {
        for (index, command) in commands.iter().enumerate() {
            command.validate().map_err(|err| {
                warn!(socket_id, index, command = command.type_name(), error = %err, "invalid command");
                SyncError::BadRequest(format!("command {index}: {err}"))
            })?;
        }

        let mut evictions = Evictions::new(self.config.evict_gone_sockets);
        for command in commands {
            match self.dispatch(socket_id, user_id, command, &mut evictions) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => {
                    debug!(socket_id, command = command.type_name(), "batch stopped");
                    break;
                }
                Err(err) => log_recovered(socket_id, command, &err),
            }
        }

        self.drain_evictions(&mut evictions);
        Ok(())
    }

    /// Removes every connection of `socket_id`.
    ///
    /// Emits a delete event for each removed client whose object keeps an
    /// auto-deleted client map. Returns the number of rows removed.
    pub fn disconnect(&self, socket_id: &str) -> SyncResult<usize> {
        let mut evictions = Evictions::new(self.config.evict_gone_sockets);
        evictions.mark_seen(socket_id);
        let result = self.clean_up_socket(socket_id, &mut evictions);
        self.drain_evictions(&mut evictions);
        result
    }

    fn dispatch(
        &self,
        socket_id: &str,
        user_id: Option<&str>,
        command: &Command,
        evictions: &mut Evictions,
    ) -> SyncResult<Flow> {
        match command {
            Command::CreateClient(req) => {
                self.registry
                    .register(&req.obj_id, &req.client_id, socket_id, user_id)?;
                Ok(Flow::Continue)
            }
            Command::Get(req) => {
                self.send_state(socket_id, req, evictions)?;
                Ok(Flow::Continue)
            }
            Command::Evt(req) => {
                self.client_events(socket_id, req, evictions)?;
                Ok(Flow::Continue)
            }
            Command::Ping(req) => self.ping(socket_id, req, evictions),
            Command::SimCleanUp(_) => {
                evictions.mark_seen(socket_id);
                let removed = self.clean_up_socket(socket_id, evictions)?;
                debug!(socket_id, removed, "simulated cleanup");
                Ok(Flow::Continue)
            }
        }
    }

    fn send_state(
        &self,
        socket_id: &str,
        req: &ObjectRequest,
        evictions: &mut Evictions,
    ) -> SyncResult<()> {
        let connection = self.registered_connection(&req.obj_id, &req.client_id)?;
        check_socket(&connection, socket_id)?;

        let object = self
            .objects
            .get_or_create(&req.obj_id, &req.client_id, &req.hints())?;
        if !self.access.check_read_access(&connection, &object) {
            return Err(SyncError::AccessDenied(format!(
                "read of {} by {}",
                req.obj_id, req.client_id
            )));
        }

        let change_index = object.change_index;
        let message = PushMessage::set(connection.client_id.as_str(), object);
        self.push(&connection.socket_id, &message, evictions)?;
        debug!(
            obj_id = %req.obj_id,
            client_id = %req.client_id,
            socket_id,
            change_index,
            "state sent"
        );
        Ok(())
    }

    fn client_events(
        &self,
        socket_id: &str,
        req: &EvtRequest,
        evictions: &mut Evictions,
    ) -> SyncResult<u64> {
        let origin = EventOrigin::Client {
            socket_id,
            client_id: &req.client_id,
        };
        self.queue_events(origin, &req.obj_id, req.events(), evictions)
    }

    /// Appends `events` and broadcasts them at the new change index.
    fn queue_events(
        &self,
        origin: EventOrigin<'_>,
        obj_id: &str,
        events: &[ChangeEvent],
        evictions: &mut Evictions,
    ) -> SyncResult<u64> {
        if let EventOrigin::Client {
            socket_id,
            client_id,
        } = origin
        {
            let connection = self.registered_connection(obj_id, client_id)?;
            check_socket(&connection, socket_id)?;
            if !self.access.check_write_access(&connection) {
                return Err(SyncError::AccessDenied(format!(
                    "write to {obj_id} by {client_id}"
                )));
            }
        }

        let outcome = self.objects.append(obj_id, events)?;
        debug!(
            obj_id,
            change_index = outcome.change_index,
            events = events.len(),
            system = matches!(origin, EventOrigin::System),
            "events appended"
        );

        let broadcast = self
            .broadcaster
            .broadcast(obj_id, outcome.change_index, events, None);
        self.maybe_merge(obj_id, outcome);

        for socket_id in broadcast?.gone_sockets {
            evictions.push(&socket_id);
        }
        Ok(outcome.change_index)
    }

    /// Folds the log into the state once it reaches the configured length.
    fn maybe_merge(&self, obj_id: &str, outcome: AppendOutcome) {
        let Some(threshold) = self.config.auto_merge_log_length else {
            return;
        };
        if outcome.log_len < threshold {
            return;
        }

        let object = match self.objects.get(obj_id) {
            Ok(Some(object)) => object,
            Ok(None) => return,
            Err(err) => {
                warn!(obj_id, error = %err, "log merge read failed");
                return;
            }
        };
        if object.change_index != outcome.change_index {
            debug!(obj_id, change_index = outcome.change_index, "object advanced, merge skipped");
            return;
        }
        let Some(merged) = self.merger.merge_log(&object.state, &object.log) else {
            return;
        };

        match self.objects.compact(obj_id, outcome.change_index, merged) {
            Ok(true) => debug!(
                obj_id,
                change_index = outcome.change_index,
                log_len = outcome.log_len,
                "log merged"
            ),
            Ok(false) => debug!(obj_id, change_index = outcome.change_index, "log merge lost race"),
            Err(err) => warn!(obj_id, error = %err, "log merge failed"),
        }
    }

    fn ping(
        &self,
        socket_id: &str,
        req: &PingRequest,
        evictions: &mut Evictions,
    ) -> SyncResult<Flow> {
        if req.pc && !self.registry.is_socket_registered(socket_id)? {
            let message = PushMessage::reconnect(req.client_id.as_str(), req.obj_id.as_str());
            if let Err(err) = self.push(socket_id, &message, evictions) {
                warn!(socket_id, client_id = %req.client_id, error = %err, "reconnect push failed");
            }
            return Ok(Flow::Stop);
        }

        let message = PushMessage::pong(req.client_id.as_str(), req.obj_id.as_str());
        self.push(socket_id, &message, evictions)?;
        Ok(Flow::Continue)
    }

    /// Deletes every connection row still bound to `socket_id`.
    fn clean_up_socket(&self, socket_id: &str, evictions: &mut Evictions) -> SyncResult<usize> {
        let mut connections = Vec::new();
        for page in self.registry.list_for_socket(socket_id, self.config.page_size) {
            connections.extend(page?);
        }

        let mut removed = 0;
        for connection in connections {
            match self
                .registry
                .remove_if_socket(&connection.obj_id, &connection.client_id, socket_id)
            {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    log_cleanup_failure(&connection, &err);
                    continue;
                }
            }
            removed += 1;
            debug!(
                obj_id = %connection.obj_id,
                client_id = %connection.client_id,
                socket_id,
                "connection removed"
            );

            if let Err(err) = self.delete_client_entry(&connection, evictions) {
                log_cleanup_failure(&connection, &err);
            }
        }
        Ok(removed)
    }

    fn delete_client_entry(
        &self,
        connection: &ClientConnection,
        evictions: &mut Evictions,
    ) -> SyncResult<()> {
        let Some(object) = self.objects.get(&connection.obj_id)? else {
            return Ok(());
        };
        let Some(prop) = object.auto_delete_prop() else {
            return Ok(());
        };

        let event = ChangeEvent::delete_prop(&connection.client_id, prop);
        self.queue_events(EventOrigin::System, &connection.obj_id, &[event], evictions)?;
        Ok(())
    }

    fn drain_evictions(&self, evictions: &mut Evictions) {
        while let Some(socket_id) = evictions.queue.pop_front() {
            match self.clean_up_socket(&socket_id, evictions) {
                Ok(removed) => debug!(socket_id = %socket_id, removed, "gone socket evicted"),
                Err(err) => warn!(socket_id = %socket_id, error = %err, "gone socket eviction failed"),
            }
        }
    }

    fn registered_connection(&self, obj_id: &str, client_id: &str) -> SyncResult<ClientConnection> {
        self.registry
            .lookup(obj_id, client_id)?
            .ok_or_else(|| SyncError::NotFound(format!("connection {client_id} on {obj_id}")))
    }

    fn push(
        &self,
        socket_id: &str,
        message: &PushMessage,
        evictions: &mut Evictions,
    ) -> SyncResult<()> {
        push_message(self.transport.as_ref(), socket_id, message).inspect_err(|err| {
            if err.is_gone_socket() {
                evictions.push(socket_id);
            }
        })
    }
}

fn check_socket(connection: &ClientConnection, socket_id: &str) -> SyncResult<()> {
    if connection.socket_id == socket_id {
        return Ok(());
    }
    Err(SyncError::StaleConnection {
        obj_id: connection.obj_id.clone(),
        client_id: connection.client_id.clone(),
        registered: connection.socket_id.clone(),
        caller: socket_id.to_string(),
    })
}

fn log_recovered(socket_id: &str, command: &Command, err: &SyncError) {
    match err {
        SyncError::Store(_) | SyncError::Concurrency { .. } | SyncError::Internal(_) => error!(
            command = command.type_name(),
            obj_id = command.obj_id(),
            client_id = command.client_id(),
            socket_id,
            error = %err,
            "command failed"
        ),
        _ => warn!(
            command = command.type_name(),
            obj_id = command.obj_id(),
            client_id = command.client_id(),
            socket_id,
            error = %err,
            "command skipped"
        ),
    }
}

fn log_cleanup_failure(connection: &ClientConnection, err: &SyncError) {
    warn!(
        obj_id = %connection.obj_id,
        client_id = %connection.client_id,
        socket_id = %connection.socket_id,
        error = %err,
        "client entry cleanup failed"
    );
}
