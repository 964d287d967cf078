//! The host functions exposed to plugin scripts.
//!
//! [`HostApi`] is the only way a script reaches anything outside its own
//! context. Engine bindings forward each injected global to one method here
//! and marshal the result; every permission decision is made in this module.
//!
//! Gated calls never fail loudly. A denied, invalid or failed call returns
//! `None`/`false`, which the bindings surface as `nil`/`()`/`false`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use kestrel_core::{PermissionType, Plugin, ResultItem, Value};

use crate::clipboard::Clipboard;
use crate::config_store::ConfigStore;
use crate::events::{self, EventSender, PluginEvent};
use crate::network::{NetworkClient, NetworkRequest};
use crate::permission::{PermissionEvaluator, canonicalize_existing, is_within, normalize_path};

/// Shared collaborators every [`HostApi`] is wired to.
#[derive(Clone)]
pub struct HostServices {
    /// Persisted per-plugin settings.
    pub config_store: Arc<ConfigStore>,

    /// Clipboard backend.
    pub clipboard: Arc<dyn Clipboard>,

    /// HTTP transport.
    pub network: Arc<dyn NetworkClient>,

    /// Change notifications.
    pub events: EventSender,

    /// Root under which each plugin gets `<data_root>/<name>`. A relative
    /// root is made absolute against the working directory at bind time.
    pub data_root: PathBuf,

    /// Largest file `readFile` will return, in bytes.
    pub max_read_size: usize,
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices")
            .field("config_root", &self.config_store.root())
            .field("data_root", &self.data_root)
            .field("max_read_size", &self.max_read_size)
            .finish_non_exhaustive()
    }
}

/// Log level accepted by the script `log` function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl ScriptLogLevel {
    /// Parse a level name. Unknown or missing names map to `Info`.
    pub fn parse(level: Option<&str>) -> Self {
        match level.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
            Some("debug") | Some("trace") => Self::Debug,
            Some("warn") | Some("warning") => Self::Warn,
            Some("error") => Self::Error,
            _ => Self::Info,
        }
    }
}

struct ApiInner {
    plugin: Arc<Plugin>,
    data_dir: PathBuf,
    results: Arc<Mutex<Vec<ResultItem>>>,
    services: HostServices,
    permissions: PermissionEvaluator,
    revoked: AtomicBool,
}

/// Capability-scoped API bound to one plugin.
///
/// Cheap to clone; engine closures each hold a clone. Once
/// [`revoke`](Self::revoke)d, every call behaves as denied.
#[derive(Clone)]
pub struct HostApi {
    inner: Arc<ApiInner>,
}

impl std::fmt::Debug for HostApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostApi")
            .field("plugin", &self.inner.plugin.name())
            .field("data_dir", &self.inner.data_dir)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

impl HostApi {
    /// Bind the API to `plugin`, writing displayed items into `results`.
    pub fn new(
        plugin: Arc<Plugin>,
        services: HostServices,
        results: Arc<Mutex<Vec<ResultItem>>>,
    ) -> Self {
        let data_dir = services.data_root.join(plugin.name());
        let data_dir = normalize_path(&std::path::absolute(&data_dir).unwrap_or(data_dir));
        Self {
            inner: Arc::new(ApiInner {
                plugin,
                data_dir,
                results,
                services,
                permissions: PermissionEvaluator::new(),
                revoked: AtomicBool::new(false),
            }),
        }
    }

    /// The plugin this API is bound to.
    pub fn plugin(&self) -> &Arc<Plugin> {
        &self.inner.plugin
    }

    pub fn plugin_name(&self) -> &str {
        self.inner.plugin.name()
    }

    /// Deny every further call through this API and any of its clones.
    pub fn revoke(&self) {
        self.inner.revoked.store(true, Ordering::SeqCst);
    }

    pub fn is_revoked(&self) -> bool {
        self.inner.revoked.load(Ordering::SeqCst)
    }

    // ---- unconditional -------------------------------------------------

    /// Replace the result list. Non-array input is ignored.
    pub fn display(&self, items: &Value) {
        if self.is_revoked() {
            return;
        }
        let Some(items) = ResultItem::list_from_value(items) else {
            tracing::debug!(plugin = %self.plugin_name(), "display() ignored non-array argument");
            return;
        };

        *self
            .inner
            .results
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = items.clone();

        events::emit(
            &self.inner.services.events,
            PluginEvent::ResultsChanged {
                plugin: self.plugin_name().to_string(),
                items,
            },
        );
    }

    /// Route a script message to tracing.
    pub fn log(&self, level: ScriptLogLevel, message: &str) {
        let plugin = self.plugin_name();
        match level {
            ScriptLogLevel::Debug => tracing::debug!(target: "plugin", plugin, "{message}"),
            ScriptLogLevel::Info => tracing::info!(target: "plugin", plugin, "{message}"),
            ScriptLogLevel::Warn => tracing::warn!(target: "plugin", plugin, "{message}"),
            ScriptLogLevel::Error => tracing::error!(target: "plugin", plugin, "{message}"),
        }
    }

    /// Shipped defaults overlaid with the currently persisted user values.
    pub fn get_config(&self) -> Value {
        let plugin = &self.inner.plugin;
        match self.inner.services.config_store.load_config(plugin.name()) {
            Ok(user) => plugin.default_config.merged(&user).to_value(),
            Err(e) => {
                tracing::warn!(plugin = %plugin.name(), error = %e, "Falling back to cached plugin config");
                plugin.effective_config.to_value()
            }
        }
    }

    /// The plugin's private data directory, created on demand.
    pub fn data_path(&self) -> PathBuf {
        let dir = &self.inner.data_dir;
        if !self.is_revoked() {
            if let Err(e) = fs::create_dir_all(dir) {
                tracing::warn!(plugin = %self.plugin_name(), path = %dir.display(), error = %e, "Cannot create data directory");
            }
        }
        dir.clone()
    }

    // ---- gated: files --------------------------------------------------

    /// Read a UTF-8 text file.
    ///
    /// Relative paths resolve against the data directory. Returns `None` when
    /// denied, missing, larger than the configured limit or not UTF-8.
    pub fn read_file(&self, path: &str) -> Option<String> {
        let path = self.authorize_path(PermissionType::FileRead, path)?;

        let metadata = fs::metadata(&path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        if metadata.len() > self.inner.services.max_read_size as u64 {
            tracing::debug!(
                plugin = %self.plugin_name(),
                path = %path.display(),
                size = metadata.len(),
                "readFile refused oversized file"
            );
            return None;
        }
        fs::read_to_string(&path).ok()
    }

    /// Write a text file, creating missing parent directories when each of
    /// them is itself writable.
    pub fn write_file(&self, path: &str, content: &str) -> bool {
        let Some(path) = self.authorize_path(PermissionType::FileWrite, path) else {
            return false;
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !self.create_parents(parent) {
                return false;
            }
        }

        match fs::write(&path, content) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(plugin = %self.plugin_name(), path = %path.display(), error = %e, "writeFile failed");
                false
            }
        }
    }

    // ---- gated: clipboard, network, notifications ----------------------

    pub fn read_clipboard(&self) -> Option<String> {
        if !self.authorize(PermissionType::Clipboard) {
            return None;
        }
        self.inner.services.clipboard.read()
    }

    pub fn write_clipboard(&self, text: &str) -> bool {
        self.authorize(PermissionType::Clipboard) && self.inner.services.clipboard.write(text)
    }

    /// Perform an HTTP request described by a URL string or request object.
    ///
    /// Returns `{status, body, headers}`; `None` when denied, malformed or the
    /// transport fails.
    pub fn network_request(&self, request: &Value) -> Option<Value> {
        if !self.authorize(PermissionType::Network) {
            return None;
        }
        let Some(request) = NetworkRequest::from_value(request) else {
            tracing::debug!(plugin = %self.plugin_name(), "networkRequest rejected malformed request");
            return None;
        };

        match self.inner.services.network.request(&request) {
            Ok(response) => Some(response.to_value()),
            Err(e) => {
                tracing::debug!(plugin = %self.plugin_name(), url = %request.url, error = %e, "networkRequest failed");
                None
            }
        }
    }

    /// Post a user-visible notification.
    pub fn notify(&self, title: &str, body: Option<&str>) -> bool {
        if !self.authorize(PermissionType::Notification) {
            return false;
        }
        events::emit(
            &self.inner.services.events,
            PluginEvent::Notification {
                plugin: self.plugin_name().to_string(),
                title: title.to_string(),
                body: body.map(str::to_string),
            },
        );
        true
    }

    // ---- introspection -------------------------------------------------

    pub fn has_permission(&self, kind: PermissionType) -> bool {
        !self.is_revoked() && self.inner.permissions.has_permission(&self.inner.plugin, kind)
    }

    pub fn has_file_read_permission(&self) -> bool {
        self.has_permission(PermissionType::FileRead)
    }

    pub fn has_file_write_permission(&self) -> bool {
        self.has_permission(PermissionType::FileWrite)
    }

    pub fn has_network_permission(&self) -> bool {
        self.has_permission(PermissionType::Network)
    }

    pub fn has_clipboard_permission(&self) -> bool {
        self.has_permission(PermissionType::Clipboard)
    }

    pub fn has_notification_permission(&self) -> bool {
        self.has_permission(PermissionType::Notification)
    }

    // ---- checks --------------------------------------------------------

    /// Resolve a script path: relative paths land in the data directory and
    /// everything is lexically normalised.
    fn resolve_path(&self, path: &str) -> Option<PathBuf> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        let path = Path::new(path);
        Some(if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.inner.data_dir.join(path))
        })
    }

    /// Data directory containment, both lexically and with symlinks in the
    /// existing prefix resolved.
    fn in_data_dir(&self, path: &Path) -> bool {
        let data_dir = &self.inner.data_dir;
        if !is_within(path, data_dir) {
            return false;
        }
        match (canonicalize_existing(path), canonicalize_existing(data_dir)) {
            (Some(real), Some(real_dir)) => is_within(&real, &real_dir),
            _ => false,
        }
    }

    fn path_allowed(&self, kind: PermissionType, path: &Path) -> bool {
        self.in_data_dir(path)
            || self
                .inner
                .permissions
                .has_file_permission(&self.inner.plugin, kind, path)
    }

    /// Create `dir` and its missing ancestors one level at a time, refusing
    /// as soon as a directory to be created is not writable. The data
    /// directory itself is host-owned and always created.
    fn create_parents(&self, dir: &Path) -> bool {
        if dir.is_dir() {
            return true;
        }
        if is_within(dir, &self.inner.data_dir)
            && fs::create_dir_all(&self.inner.data_dir).is_err()
        {
            return false;
        }

        let mut missing = Vec::new();
        let mut current = dir;
        while !current.exists() {
            if !self.path_allowed(PermissionType::FileWrite, current) {
                tracing::debug!(
                    plugin = %self.plugin_name(),
                    path = %current.display(),
                    "writeFile refused to create directory outside writable scope"
                );
                return false;
            }
            missing.push(current);
            match current.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => current = parent,
                _ => break,
            }
        }

        for dir in missing.into_iter().rev() {
            match fs::create_dir(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    tracing::debug!(plugin = %self.plugin_name(), path = %dir.display(), error = %e, "writeFile cannot create directory");
                    return false;
                }
            }
        }
        true
    }

    fn authorize_path(&self, kind: PermissionType, path: &str) -> Option<PathBuf> {
        if self.is_revoked() {
            return None;
        }
        let resolved = self.resolve_path(path)?;
        if self.path_allowed(kind, &resolved) {
            Some(resolved)
        } else {
            tracing::debug!(
                plugin = %self.plugin_name(),
                capability = %kind,
                path = %resolved.display(),
                "Permission denied"
            );
            None
        }
    }

    fn authorize(&self, kind: PermissionType) -> bool {
        let allowed = self.has_permission(kind);
        if !allowed {
            tracing::debug!(plugin = %self.plugin_name(), capability = %kind, "Permission denied");
        }
        allowed
    }
}
