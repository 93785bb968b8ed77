//! The embeddable node client library (spec.md §2 item 4, §4.4).
//!
//! `Client::run` is the explicit linear barrier spec.md's design notes ask
//! for — connect, register, await greenLight, run `onInit`, run
//! `onConnect` — expressed as a single `async fn` rather than nested
//! callbacks.

pub mod pending;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dusa_collection_utils::core::logger::LogLevel;
use dusa_collection_utils::core::types::rwarc::LockWithTimeout;
use dusa_collection_utils::log;
use serde_json::{json, Value};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Notify};

use crate::config::ClientConfig;
use crate::error::SamError;
use crate::packet::Packet;
use crate::registry::Outbound;
use crate::routing::{self, RoutingKey};
use crate::wire;

use pending::PendingCalls;

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Handler = Arc<dyn Fn(Client, Packet) -> HandlerFuture + Send + Sync>;
type Hook = Arc<dyn Fn(Client) -> HandlerFuture + Send + Sync>;

fn box_handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Client, Packet) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |client, packet| Box::pin(f(client, packet)) as HandlerFuture)
}

fn box_hook<F, Fut>(f: F) -> Hook
where
    F: Fn(Client) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |client| Box::pin(f(client)) as HandlerFuture)
}

/// The embeddable client: connection state, the handler table, the
/// pending-call correlator and the readiness flag. Cheap to clone — every
/// field is either an `Arc` or an `Arc`-backed [`LockWithTimeout`] — so
/// handler tasks and the reader loop can each hold their own handle.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    pending: Arc<PendingCalls>,
    handlers: LockWithTimeout<HashMap<String, Handler>>,
    outbound: LockWithTimeout<Option<mpsc::UnboundedSender<Outbound>>>,
    ready: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    on_init: Option<Hook>,
    on_connect: Option<Hook>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client {
            config: Arc::new(config),
            pending: Arc::new(PendingCalls::new()),
            handlers: LockWithTimeout::new(HashMap::new()),
            outbound: LockWithTimeout::new(None),
            ready: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
            on_init: None,
            on_connect: None,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }

    pub fn hub_name(&self) -> &str {
        &self.config.hub_name
    }

    /// The readiness gate: `true` once `greenLight` has returned true.
    /// Domain handlers must not be invoked before this (spec.md §8).
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Node-local initialization hook, run after the readiness gate opens
    /// and before user handlers are considered bound (spec.md §4.4 step 5).
    pub fn with_on_init<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Client) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_init = Some(box_hook(hook));
        self
    }

    /// The node's "main"; run last in the startup sequence (spec.md §4.4
    /// step 7).
    pub fn with_on_connect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Client) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_connect = Some(box_hook(hook));
        self
    }

    /// `addApiCall(name, handler)`: binds `<nodeName>.<name>`.
    pub async fn add_api_call<F, Fut>(&self, name: impl Into<String>, handler: F) -> Result<(), SamError>
    where
        F: Fn(Client, Packet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = routing::node_api_key(&self.config.node_name, &name.into());
        self.add_hook(key, handler).await
    }

    /// `addHook(fullKey, handler)`: binds an arbitrary key, e.g. to observe
    /// another node's traffic.
    pub async fn add_hook<F, Fut>(&self, key: impl Into<String>, handler: F) -> Result<(), SamError>
    where
        F: Fn(Client, Packet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handlers = self.handlers.try_write().await?;
        handlers.insert(key.into(), box_handler(handler));
        Ok(())
    }

    /// `callApi(receiver, apiCall, args?)` using the client's configured
    /// default timeout, if any.
    pub async fn call_api(&self, receiver: &str, api_call: &str, args: Value) -> Result<Packet, SamError> {
        let timeout = self.config.default_call_timeout_ms.map(Duration::from_millis);
        self.call_api_with_timeout(receiver, api_call, args, timeout).await
    }

    /// `callApi` with an explicit per-call timeout override (spec.md §4.4).
    pub async fn call_api_with_timeout(
        &self,
        receiver: &str,
        api_call: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Packet, SamError> {
        let return_code = self.pending.next_return_code();
        let packet = Packet::new(&self.config.node_name, receiver, api_call)
            .args(args)
            .return_code(return_code)
            .with_bdata()
            .build();

        let rx = self.pending.register(return_code).await?;

        let outbound_key = if receiver == self.config.hub_name {
            routing::hub_api_key(&self.config.hub_name, api_call)
        } else {
            routing::send_key(&self.config.hub_name)
        };
        self.emit(outbound_key, packet).await?;

        match timeout {
            Some(duration) => match tokio::time::timeout(duration, rx).await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(_)) => Err(SamError::transport("pending call dropped before a reply arrived")),
                Err(_) => {
                    self.pending.cancel(return_code).await?;
                    Ok(Packet::timeout_reply(&self.config.node_name, receiver, api_call, Some(return_code)))
                }
            },
            None => rx.await.map_err(|_| SamError::transport("pending call dropped before a reply arrived")),
        }
    }

    /// `return(packet)`: sets `status=true` if unset, emits under
    /// `<hubName>.return`.
    pub async fn reply_ok(&self, mut packet: Packet) -> Result<(), SamError> {
        packet.mark_ok();
        self.emit(routing::return_key(&self.config.hub_name), packet).await
    }

    /// `returnError(packet, msg?)`: sets `status=false`, fills
    /// `errorMessage` if absent, emits under `<hubName>.return`.
    pub async fn reply_error(&self, mut packet: Packet, msg: impl Into<String>) -> Result<(), SamError> {
        packet.mark_error(msg);
        self.emit(routing::return_key(&self.config.hub_name), packet).await
    }

    async fn emit(&self, key: impl Into<String>, packet: Packet) -> Result<(), SamError> {
        let outbound = self.outbound.try_read().await?;
        match outbound.as_ref() {
            Some(tx) => tx
                .send((key.into(), packet))
                .map_err(|_| SamError::transport("client's writer task has exited")),
            None => Err(SamError::transport("client is not connected")),
        }
    }

    /// Runs the full startup sequence (spec.md §4.4): connect with
    /// reconnect retry, `nodeInit`, always-on listeners, the `greenLight`
    /// poll, `onInit`, then `onConnect`. Returns once the connection to
    /// the hub is lost or [`Client::shutdown`] is called.
    pub async fn run(self) -> Result<(), SamError> {
        let stream = loop {
            match UnixStream::connect(&self.config.socket_path).await {
                Ok(stream) => break stream,
                Err(e) => {
                    if !self.config.silent {
                        log!(
                            LogLevel::Warn,
                            "connect to hub \"{}\" failed: {} — retrying in {}ms",
                            self.config.hub_name,
                            e,
                            self.config.reconnect_interval_ms
                        );
                    }
                    tokio::time::sleep(Duration::from_millis(self.config.reconnect_interval_ms)).await;
                }
            }
        };

        self.handle_connection(stream).await
    }

    async fn handle_connection(self, stream: UnixStream) -> Result<(), SamError> {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
        {
            let mut outbound = self.outbound.try_write().await?;
            *outbound = Some(tx);
        }

        let writer_task = tokio::spawn(run_writer(write_half, rx));
        let reader_client = self.clone();
        let reader_task = tokio::spawn(async move { run_reader(reader_client, read_half).await });

        let registration = self
            .call_api(&self.config.hub_name.clone(), "nodeInit", json!({ "name": self.config.node_name }))
            .await?;
        if !registration.status {
            return Err(SamError::protocol(
                registration.error_message.unwrap_or_else(|| "nodeInit failed".to_string()),
            ));
        }
        if !self.config.silent {
            log!(LogLevel::Info, "node \"{}\" registered with hub \"{}\"", self.config.node_name, self.config.hub_name);
        }

        let message_key = routing::message_key(&self.config.node_name);
        let has_message_handler = {
            let handlers = self.handlers.try_read().await?;
            handlers.contains_key(&message_key)
        };
        if !has_message_handler {
            self.add_hook(message_key, default_message_handler).await?;
        }

        loop {
            let reply = self.call_api(&self.config.hub_name, "greenLight", json!({})).await?;
            if reply.result.as_bool() == Some(true) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(self.config.green_light_poll_ms)).await;
        }
        self.ready.store(true, Ordering::SeqCst);
        if !self.config.silent {
            log!(LogLevel::Info, "greenLight received for node \"{}\"", self.config.node_name);
        }

        if let Some(hook) = self.on_init.clone() {
            hook(self.clone()).await;
        }
        if let Some(hook) = self.on_connect.clone() {
            hook(self.clone()).await;
        }

        let _ = reader_task.await;
        writer_task.abort();
        Ok(())
    }

    async fn dispatch_inbound(&self, key: String, packet: Packet) {
        if let RoutingKey::NodeReturn { return_code, .. } = RoutingKey::parse(&key) {
            match self.pending.resolve(return_code, packet).await {
                Ok(true) => {}
                Ok(false) => log!(LogLevel::Trace, "dropped late/unknown reply for code {}", return_code),
                Err(e) => log!(LogLevel::Warn, "pending-call table error: {}", e),
            }
            return;
        }

        let handler = {
            match self.handlers.try_read().await {
                Ok(handlers) => handlers.get(&key).cloned(),
                Err(e) => {
                    log!(LogLevel::Warn, "handler table lock error: {}", e);
                    None
                }
            }
        };

        match handler {
            Some(handler) => {
                let client = self.clone();
                // Spawned, not awaited inline: a handler may itself call
                // `call_api` and suspend on its reply, which this same
                // reader loop must remain free to read (spec.md §5).
                tokio::spawn(async move { handler(client, packet).await });
            }
            None => log!(LogLevel::Trace, "no handler registered for key \"{}\"", key),
        }
    }

    /// Local, voluntary teardown: stops the reader loop and drops the
    /// connection without relying on the hub noticing a transport error.
    /// Supplemented beyond spec.md's silence on the voluntary path (see
    /// SPEC_FULL.md).
    pub async fn shutdown(&self) -> Result<(), SamError> {
        self.shutdown_notify.notify_waiters();
        let mut outbound = self.outbound.try_write().await?;
        *outbound = None;
        Ok(())
    }
}

async fn default_message_handler(_client: Client, packet: Packet) {
    let message = packet.args.get("message").and_then(Value::as_str).unwrap_or_default();
    log!(LogLevel::Info, "Message from {}: {}", packet.sender, message);
}

async fn run_writer(mut write_half: tokio::net::unix::OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some((key, packet)) = rx.recv().await {
        if let Err(e) = wire::send_frame(&mut write_half, &key, &packet).await {
            log!(LogLevel::Warn, "client failed writing to hub: {}", e);
            break;
        }
    }
}

async fn run_reader(client: Client, mut read_half: OwnedReadHalf) {
    loop {
        tokio::select! {
            frame = wire::recv_frame(&mut read_half) => {
                match frame {
                    Ok((key, packet)) => client.dispatch_inbound(key, packet).await,
                    Err(e) => {
                        log!(LogLevel::Warn, "connection to hub \"{}\" lost: {}", client.config.hub_name, e);
                        break;
                    }
                }
            }
            _ = client.shutdown_notify.notified() => break,
        }
    }
    client.ready.store(false, Ordering::SeqCst);
}
