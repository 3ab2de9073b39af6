//! Typed result relay for host-side collaborators
//!
//! The game registers a handler (or a channel) before asking the host to show a
//! dialog, download a picture, log in, or run a graph request, and passes the
//! returned request id along. When the host calls back with that id the handler
//! runs exactly once with either the typed payload or a `CollaboratorError`.
//!
//! `Relay`'s request methods do both halves: register, then hand the id to a
//! `HostRequests` implementation. If the host can't be reached the registration
//! is withdrawn and the handler never runs.

use crate::error::{MotionError, MotionResult};
use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

pub type RequestId = u64;

/// Failure reported by the host for a relayed request
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollaboratorError {
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Failed: {0}")]
    Failed(String),
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

type Handler<T> = Box<dyn FnOnce(CollaboratorResult<T>) + Send>;

pub struct CallbackRegistry<T> {
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, Handler<T>>>,
}

impl<T: Send + 'static> CallbackRegistry<T> {
    pub fn new() -> Self {
        Self {
            // 0 is never issued so the host can use it as "no request"
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, Handler<T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register<F>(&self, handler: F) -> RequestId
    where
        F: FnOnce(CollaboratorResult<T>) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, Box::new(handler));
        id
    }

    /// Register a request whose result is delivered on a channel
    pub fn register_channel(&self) -> (RequestId, Receiver<CollaboratorResult<T>>) {
        let (tx, rx): (Sender<CollaboratorResult<T>>, _) = channel::bounded(1);
        let id = self.register(move |result| {
            // Receiver may already be gone; nothing left to notify then
            let _ = tx.send(result);
        });
        (id, rx)
    }

    /// Register `handler`, then pass the new id to `send`. A failed send
    /// withdraws the registration without running the handler.
    pub fn issue<F, S>(&self, handler: F, send: S) -> MotionResult<RequestId>
    where
        F: FnOnce(CollaboratorResult<T>) + Send + 'static,
        S: FnOnce(RequestId) -> MotionResult<()>,
    {
        let id = self.register(handler);
        if let Err(e) = send(id) {
            self.lock().remove(&id);
            warn!("Host request {} not sent: {}", id, e);
            return Err(e);
        }
        debug!("Host request {} sent", id);
        Ok(id)
    }

    /// Deliver a result. Unknown or already completed ids are an error.
    pub fn complete(&self, id: RequestId, result: CollaboratorResult<T>) -> MotionResult<()> {
        // Handler runs outside the lock so it may register follow-up requests
        let handler = self.lock().remove(&id).ok_or(MotionError::UnknownRequest(id))?;
        debug!("Completing request {} (ok: {})", id, result.is_ok());
        handler(result);
        Ok(())
    }

    pub fn cancel(&self, id: RequestId, reason: &str) -> MotionResult<()> {
        self.complete(id, Err(CollaboratorError::Cancelled(reason.to_string())))
    }

    /// Cancel everything still outstanding, e.g. on activity teardown
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<(RequestId, Handler<T>)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, handler) in drained {
            debug!("Cancelling request {}", id);
            handler(Err(CollaboratorError::Cancelled(reason.to_string())));
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }
}

impl<T: Send + 'static> Default for CallbackRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Alert dialog button, from DialogInterface.BUTTON_*
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogButton {
    Positive,
    Negative,
    Neutral,
}

impl DialogButton {
    pub fn from_android(which: i32) -> MotionResult<Self> {
        match which {
            -1 => Ok(DialogButton::Positive),
            -2 => Ok(DialogButton::Negative),
            -3 => Ok(DialogButton::Neutral),
            other => Err(MotionError::InvalidParameters(format!(
                "unknown dialog button {}",
                other
            ))),
        }
    }
}

/// Outcome of a social-login permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionState {
    Unknown,
    Error,
    Declined,
    Accepted,
}

impl PermissionState {
    pub fn from_code(code: i64) -> MotionResult<Self> {
        match code {
            0 => Ok(PermissionState::Unknown),
            1 => Ok(PermissionState::Error),
            2 => Ok(PermissionState::Declined),
            3 => Ok(PermissionState::Accepted),
            other => Err(MotionError::InvalidParameters(format!(
                "unknown permission state {}",
                other
            ))),
        }
    }

    /// Fold the host's (state, error message) pair into a result
    pub fn into_result(self, error_message: &str) -> CollaboratorResult<PermissionState> {
        match self {
            PermissionState::Accepted | PermissionState::Declined => Ok(self),
            PermissionState::Unknown => Err(CollaboratorError::Cancelled(error_message.to_string())),
            PermissionState::Error => Err(CollaboratorError::Failed(error_message.to_string())),
        }
    }
}

/// Contents of a two-button alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogRequest {
    pub title: String,
    pub message: String,
    pub confirm_caption: String,
    pub cancel_caption: String,
}

/// Which permission set a login asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionKind {
    Read,
    Publish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    /// Ordinal understood by the host's graph request helper
    pub fn code(self) -> i64 {
        match self {
            HttpMethod::Get => 0,
            HttpMethod::Post => 1,
            HttpMethod::Delete => 2,
        }
    }
}

/// Outbound calls into the host. Each call carries the request id the host
/// must echo back through the matching completion entry point.
pub trait HostRequests: Send + Sync {
    fn present_dialog(&self, id: RequestId, request: &DialogRequest) -> MotionResult<()>;

    fn download_picture(&self, id: RequestId, url: &str) -> MotionResult<()>;

    fn request_permissions(
        &self,
        id: RequestId,
        kind: PermissionKind,
        rerequest: bool,
    ) -> MotionResult<()>;

    fn graph_request(
        &self,
        id: RequestId,
        path: &str,
        parameters: &BTreeMap<String, String>,
        method: HttpMethod,
    ) -> MotionResult<()>;
}

/// Parse a graph response; a non-empty error message wins over the body.
pub fn graph_result(json: Option<&str>, error_message: &str) -> CollaboratorResult<serde_json::Value> {
    if !error_message.is_empty() {
        return Err(CollaboratorError::Failed(error_message.to_string()));
    }
    match json {
        Some(body) => serde_json::from_str(body)
            .map_err(|e| CollaboratorError::Failed(format!("Malformed graph response: {}", e))),
        None => Ok(serde_json::Value::Null),
    }
}

/// Every collaborator channel the host can answer on
pub struct Relay {
    pub dialogs: CallbackRegistry<DialogButton>,
    pub pictures: CallbackRegistry<Vec<u8>>,
    pub logins: CallbackRegistry<PermissionState>,
    pub graph: CallbackRegistry<serde_json::Value>,
    token_watchers: Mutex<Vec<Sender<bool>>>,
}

impl Relay {
    pub fn new() -> Self {
        Self {
            dialogs: CallbackRegistry::new(),
            pictures: CallbackRegistry::new(),
            logins: CallbackRegistry::new(),
            graph: CallbackRegistry::new(),
            token_watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn present_dialog<F>(
        &self,
        host: &dyn HostRequests,
        request: &DialogRequest,
        handler: F,
    ) -> MotionResult<RequestId>
    where
        F: FnOnce(CollaboratorResult<DialogButton>) + Send + 'static,
    {
        self.dialogs.issue(handler, |id| host.present_dialog(id, request))
    }

    /// Fetch image bytes; decoding is left to the caller
    pub fn download_picture<F>(
        &self,
        host: &dyn HostRequests,
        url: &str,
        handler: F,
    ) -> MotionResult<RequestId>
    where
        F: FnOnce(CollaboratorResult<Vec<u8>>) + Send + 'static,
    {
        self.pictures.issue(handler, |id| host.download_picture(id, url))
    }

    pub fn request_permissions<F>(
        &self,
        host: &dyn HostRequests,
        kind: PermissionKind,
        rerequest: bool,
        handler: F,
    ) -> MotionResult<RequestId>
    where
        F: FnOnce(CollaboratorResult<PermissionState>) + Send + 'static,
    {
        self.logins
            .issue(handler, |id| host.request_permissions(id, kind, rerequest))
    }

    pub fn graph_request<F>(
        &self,
        host: &dyn HostRequests,
        path: &str,
        parameters: &BTreeMap<String, String>,
        method: HttpMethod,
        handler: F,
    ) -> MotionResult<RequestId>
    where
        F: FnOnce(CollaboratorResult<serde_json::Value>) + Send + 'static,
    {
        self.graph
            .issue(handler, |id| host.graph_request(id, path, parameters, method))
    }

    /// Receive `true`/`false` whenever the login session appears or goes away
    pub fn watch_access_token(&self) -> Receiver<bool> {
        let (tx, rx) = channel::unbounded();
        self.token_watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn access_token_changed(&self, logged_in: bool) {
        let mut watchers = self.token_watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.retain(|tx| tx.send(logged_in).is_ok());
    }

    pub fn cancel_all(&self, reason: &str) {
        let cancelled = self.dialogs.cancel_all(reason)
            + self.pictures.cancel_all(reason)
            + self.logins.cancel_all(reason)
            + self.graph.cancel_all(reason);
        if cancelled > 0 {
            warn!("Cancelled {} outstanding host requests: {}", cancelled, reason);
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Records outbound calls; optionally refuses them
    #[derive(Default)]
    struct RecordingHost {
        calls: Mutex<Vec<(RequestId, String)>>,
        unreachable: bool,
    }

    impl RecordingHost {
        fn record(&self, id: RequestId, call: String) -> MotionResult<()> {
            if self.unreachable {
                return Err(MotionError::Internal("host detached".to_string()));
            }
            self.calls.lock().unwrap().push((id, call));
            Ok(())
        }
    }

    impl HostRequests for RecordingHost {
        fn present_dialog(&self, id: RequestId, request: &DialogRequest) -> MotionResult<()> {
            self.record(id, format!("dialog:{}", request.title))
        }

        fn download_picture(&self, id: RequestId, url: &str) -> MotionResult<()> {
            self.record(id, format!("picture:{}", url))
        }

        fn request_permissions(
            &self,
            id: RequestId,
            kind: PermissionKind,
            rerequest: bool,
        ) -> MotionResult<()> {
            self.record(id, format!("login:{:?}:{}", kind, rerequest))
        }

        fn graph_request(
            &self,
            id: RequestId,
            path: &str,
            parameters: &BTreeMap<String, String>,
            method: HttpMethod,
        ) -> MotionResult<()> {
            self.record(id, format!("graph:{}:{}:{}", path, parameters.len(), method.code()))
        }
    }

    fn dialog() -> DialogRequest {
        DialogRequest {
            title: "Quit".to_string(),
            message: "Leave the level?".to_string(),
            confirm_caption: "Yes".to_string(),
            cancel_caption: "No".to_string(),
        }
    }

    #[test]
    fn test_handler_runs_exactly_once() {
        let registry = CallbackRegistry::<DialogButton>::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let id = registry.register(move |result| sink.lock().unwrap().push(result));

        assert_eq!(registry.pending(), 1);
        registry.complete(id, Ok(DialogButton::Positive)).unwrap();
        assert_eq!(
            registry.complete(id, Ok(DialogButton::Negative)),
            Err(MotionError::UnknownRequest(id))
        );

        assert_eq!(*calls.lock().unwrap(), vec![Ok(DialogButton::Positive)]);
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn test_ids_are_unique_and_nonzero() {
        let registry = CallbackRegistry::<()>::new();
        let a = registry.register(|_| {});
        let b = registry.register(|_| {});
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_channel_delivery() {
        let registry = CallbackRegistry::<Vec<u8>>::new();
        let (id, rx) = registry.register_channel();
        registry.complete(id, Ok(vec![0x89, 0x50, 0x4e, 0x47])).unwrap();
        assert_eq!(rx.recv().unwrap(), Ok(vec![0x89, 0x50, 0x4e, 0x47]));
    }

    #[test]
    fn test_channel_delivery_after_receiver_dropped() {
        let registry = CallbackRegistry::<Vec<u8>>::new();
        let (id, rx) = registry.register_channel();
        drop(rx);
        assert!(registry.complete(id, Ok(Vec::new())).is_ok());
    }

    #[test]
    fn test_cancel_all() {
        let registry = CallbackRegistry::<PermissionState>::new();
        let (_, rx1) = registry.register_channel();
        let (_, rx2) = registry.register_channel();
        assert_eq!(registry.cancel_all("teardown"), 2);
        assert_eq!(
            rx1.recv().unwrap(),
            Err(CollaboratorError::Cancelled("teardown".to_string()))
        );
        assert!(rx2.recv().unwrap().is_err());
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn test_handler_can_register_follow_up() {
        let registry = Arc::new(CallbackRegistry::<()>::new());
        let inner = Arc::clone(&registry);
        let id = registry.register(move |_| {
            inner.register(|_| {});
        });
        registry.complete(id, Ok(())).unwrap();
        assert_eq!(registry.pending(), 1);
    }

    #[test]
    fn test_dialog_buttons() {
        assert_eq!(DialogButton::from_android(-1).unwrap(), DialogButton::Positive);
        assert_eq!(DialogButton::from_android(-2).unwrap(), DialogButton::Negative);
        assert_eq!(DialogButton::from_android(-3).unwrap(), DialogButton::Neutral);
        assert!(DialogButton::from_android(0).is_err());
    }

    #[test]
    fn test_permission_states() {
        assert_eq!(
            PermissionState::from_code(3).unwrap().into_result(""),
            Ok(PermissionState::Accepted)
        );
        assert_eq!(
            PermissionState::from_code(2).unwrap().into_result(""),
            Ok(PermissionState::Declined)
        );
        assert_eq!(
            PermissionState::from_code(0).unwrap().into_result("Login was cancelled."),
            Err(CollaboratorError::Cancelled("Login was cancelled.".to_string()))
        );
        assert!(matches!(
            PermissionState::from_code(1).unwrap().into_result("boom"),
            Err(CollaboratorError::Failed(_))
        ));
        assert!(PermissionState::from_code(9).is_err());
    }

    #[test]
    fn test_graph_result() {
        let value = graph_result(Some(r#"{"id": "42", "name": "Ada"}"#), "").unwrap();
        assert_eq!(value["name"], "Ada");
        assert_eq!(graph_result(None, "").unwrap(), serde_json::Value::Null);
        assert!(graph_result(Some("{"), "").is_err());
        assert_eq!(
            graph_result(Some("{}"), "timeout"),
            Err(CollaboratorError::Failed("timeout".to_string()))
        );
    }

    #[test]
    fn test_access_token_watchers() {
        let relay = Relay::new();
        let rx = relay.watch_access_token();
        let dropped = relay.watch_access_token();
        drop(dropped);

        relay.access_token_changed(true);
        relay.access_token_changed(false);
        assert_eq!(rx.try_recv(), Ok(true));
        assert_eq!(rx.try_recv(), Ok(false));
        assert_eq!(relay.token_watchers.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_dialog_request_round_trip() {
        let relay = Relay::new();
        let host = RecordingHost::default();
        let (tx, rx) = channel::bounded(1);
        let id = relay
            .present_dialog(&host, &dialog(), move |result| {
                tx.send(result).unwrap();
            })
            .unwrap();

        assert_eq!(*host.calls.lock().unwrap(), vec![(id, "dialog:Quit".to_string())]);
        assert_eq!(relay.dialogs.pending(), 1);

        relay.dialogs.complete(id, Ok(DialogButton::Negative)).unwrap();
        assert_eq!(rx.recv().unwrap(), Ok(DialogButton::Negative));
        assert_eq!(relay.dialogs.pending(), 0);
    }

    #[test]
    fn test_each_request_kind_reaches_host() {
        let relay = Relay::new();
        let host = RecordingHost::default();
        let mut parameters = BTreeMap::new();
        parameters.insert("fields".to_string(), "id,name".to_string());

        let picture = relay
            .download_picture(&host, "https://example.com/p.png", |_| {})
            .unwrap();
        let login = relay
            .request_permissions(&host, PermissionKind::Read, false, |_| {})
            .unwrap();
        let graph = relay
            .graph_request(&host, "/me", &parameters, HttpMethod::Get, |_| {})
            .unwrap();

        assert_eq!(
            *host.calls.lock().unwrap(),
            vec![
                (picture, "picture:https://example.com/p.png".to_string()),
                (login, "login:Read:false".to_string()),
                (graph, "graph:/me:1:0".to_string()),
            ]
        );
        relay.pictures.complete(picture, Ok(vec![1, 2, 3])).unwrap();
        relay
            .logins
            .complete(login, PermissionState::Accepted.into_result(""))
            .unwrap();
        relay
            .graph
            .complete(graph, graph_result(Some(r#"{"id": "7"}"#), ""))
            .unwrap();
    }

    #[test]
    fn test_unreachable_host_withdraws_request() {
        let relay = Relay::new();
        let host = RecordingHost {
            unreachable: true,
            ..RecordingHost::default()
        };
        let fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&fired);

        let result = relay.present_dialog(&host, &dialog(), move |_| {
            *flag.lock().unwrap() = true;
        });
        assert!(matches!(result, Err(MotionError::Internal(_))));
        assert_eq!(relay.dialogs.pending(), 0);

        relay.cancel_all("teardown");
        assert!(!*fired.lock().unwrap());
    }
}
