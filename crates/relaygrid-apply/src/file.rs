//! Config-patch strategy: rewrite the proxy's config file under an
//! advisory lock, validate the candidate with the proxy's own parser,
//! swap it into place atomically, and reload the service.

use std::collections::HashMap;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use relay_core::{diff, ClientSpec, InboundTags, Proto, RouteRule};
use relaygrid_proxy::{client_entry, ProxyError, ServiceControl};

use crate::applier::Applier;
use crate::error::ApplyError;
use crate::lock::FileLock;

const RELOAD_ATTEMPTS: u32 = 4;
const RELOAD_INITIAL_DELAY: Duration = Duration::from_millis(500);

pub struct ConfigPatchApplier {
    config_path: PathBuf,
    lock_path: PathBuf,
    inbounds: InboundTags,
    control: Arc<dyn ServiceControl>,
    // Set when a swap landed but the reload failed, so the next cycle
    // retries the reload even though the file already matches.
    needs_reload: AtomicBool,
}

impl ConfigPatchApplier {
    pub fn new(
        config_path: PathBuf,
        lock_path: PathBuf,
        inbounds: InboundTags,
        control: Arc<dyn ServiceControl>,
    ) -> Self {
        Self {
            config_path,
            lock_path,
            inbounds,
            control,
            needs_reload: AtomicBool::new(false),
        }
    }

    fn read_error(&self, source: std::io::Error) -> ApplyError {
        ApplyError::Read {
            path: self.config_path.clone(),
            source,
        }
    }

    fn parse_error(&self, source: serde_json::Error) -> ApplyError {
        ApplyError::Parse {
            path: self.config_path.clone(),
            source,
        }
    }
}

#[async_trait]
impl Applier for ConfigPatchApplier {
    async fn apply(
        &self,
        _current_clients: &HashMap<String, ClientSpec>,
        desired_clients: &[ClientSpec],
        current_routes: &HashMap<String, RouteRule>,
        desired_routes: &[RouteRule],
    ) -> Result<bool, ApplyError> {
        let routes = diff(current_routes, desired_routes);
        if !routes.is_empty() {
            warn!(
                adds = routes.adds.len(),
                removes = routes.removes.len(),
                "route changes need the admin api, leaving routing config untouched"
            );
        }

        let _lock = FileLock::acquire(&self.lock_path).await?;

        let raw = tokio::fs::read_to_string(&self.config_path)
            .await
            .map_err(|err| self.read_error(err))?;
        let mut root: Value = serde_json::from_str(&raw).map_err(|err| self.parse_error(err))?;
        let before = root.clone();

        patch_inbounds(&mut root, &self.inbounds, desired_clients)?;

        // Entries are built in sorted order, so an unchanged desired
        // state reproduces the tree already on disk and lands here.
        if root == before {
            if self.needs_reload.load(Ordering::SeqCst) {
                reload_with_backoff(self.control.as_ref())
                    .await
                    .map_err(ApplyError::Reload)?;
                self.needs_reload.store(false, Ordering::SeqCst);
                info!("pending reload completed");
            }
            return Ok(false);
        }

        let mut rendered =
            serde_json::to_vec_pretty(&root).map_err(|err| self.parse_error(err))?;
        rendered.push(b'\n');

        let dir = self.config_path.parent().unwrap_or(Path::new("."));
        let mut candidate = tempfile::Builder::new()
            .prefix(".relaygrid-candidate-")
            .suffix(".json")
            .tempfile_in(dir)
            .map_err(ApplyError::Swap)?;
        candidate.write_all(&rendered).map_err(ApplyError::Swap)?;
        candidate
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(ApplyError::Swap)?;

        if let Err(err) = self.control.validate_config(candidate.path()).await {
            return Err(ApplyError::Validation(err));
        }

        candidate
            .persist(&self.config_path)
            .map_err(|err| ApplyError::Swap(err.error))?;
        debug!(path = %self.config_path.display(), "config swapped");

        if let Err(err) = reload_with_backoff(self.control.as_ref()).await {
            self.needs_reload.store(true, Ordering::SeqCst);
            return Err(ApplyError::Reload(err));
        }
        self.needs_reload.store(false, Ordering::SeqCst);
        Ok(true)
    }
}

/// Replace every inbound's client list with entries built from the
/// desired snapshot, bucketed by protocol and sorted by email.
fn patch_inbounds(
    root: &mut Value,
    inbounds: &InboundTags,
    desired: &[ClientSpec],
) -> Result<(), ApplyError> {
    let list = root
        .get_mut("inbounds")
        .and_then(Value::as_array_mut)
        .ok_or(ApplyError::MissingInbounds)?;

    for proto in Proto::ALL {
        let mut members: Vec<&ClientSpec> = desired.iter().filter(|c| c.proto == proto).collect();
        members.sort_by(|a, b| a.email.cmp(&b.email));
        let entries: Vec<Value> = members.into_iter().map(client_entry).collect();
        set_clients(list, inbounds.for_proto(proto), entries)?;
    }
    Ok(())
}

fn set_clients(inbounds: &mut [Value], tag: &str, entries: Vec<Value>) -> Result<(), ApplyError> {
    let mut found = false;
    for inbound in inbounds.iter_mut() {
        if inbound.get("tag").and_then(Value::as_str) != Some(tag) {
            continue;
        }
        let settings = inbound
            .get_mut("settings")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| ApplyError::MalformedInbound {
                tag: tag.to_string(),
            })?;
        settings.insert("clients".to_string(), Value::Array(entries.clone()));
        found = true;
    }
    if !found {
        return Err(ApplyError::MissingInbound {
            tag: tag.to_string(),
        });
    }
    Ok(())
}

async fn reload_with_backoff(control: &dyn ServiceControl) -> Result<(), ProxyError> {
    let mut delay = RELOAD_INITIAL_DELAY;
    for _ in 1..RELOAD_ATTEMPTS {
        match control.reload().await {
            Ok(()) => return Ok(()),
            Err(err) => warn!(%err, "proxy reload failed, backing off"),
        }
        tokio::time::sleep(delay).await;
        delay *= 2;
    }
    control.reload().await
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    use serde_json::json;

    #[derive(Default)]
    struct ScriptedControl {
        validations: Mutex<Vec<PathBuf>>,
        reject_config: AtomicBool,
        reload_failures: AtomicU32,
        reloads: AtomicU32,
    }

    #[async_trait]
    impl ServiceControl for ScriptedControl {
        async fn validate_config(&self, path: &Path) -> Result<(), ProxyError> {
            self.validations.lock().unwrap().push(path.to_path_buf());
            if self.reject_config.load(Ordering::SeqCst) {
                return Err(ProxyError::CommandTimeout {
                    cmd: "proxy -test".into(),
                });
            }
            Ok(())
        }

        async fn reload(&self) -> Result<(), ProxyError> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            let remaining = self.reload_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.reload_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ProxyError::CommandTimeout {
                    cmd: "systemctl reload proxy".into(),
                });
            }
            Ok(())
        }
    }

    fn seed_config(dir: &Path) -> PathBuf {
        let doc = json!({
            "log": {"loglevel": "warning"},
            "inbounds": [
                {"tag": "vless-in", "protocol": "vless",
                 "settings": {"clients": [], "decryption": "none"}},
                {"tag": "vmess-in", "protocol": "vmess", "settings": {"clients": []}},
                {"tag": "trojan-in", "protocol": "trojan", "settings": {"clients": []}}
            ],
            "outbounds": [{"tag": "direct", "protocol": "freedom"}]
        });
        let path = dir.join("config.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
        path
    }

    fn applier_at(config: &Path, control: Arc<ScriptedControl>) -> ConfigPatchApplier {
        ConfigPatchApplier::new(
            config.to_path_buf(),
            config.with_extension("json.lock"),
            InboundTags::default(),
            control,
        )
    }

    fn vless(email: &str) -> ClientSpec {
        ClientSpec {
            proto: Proto::Vless,
            id: format!("uuid-{email}"),
            password: String::new(),
            email: email.into(),
        }
    }

    fn trojan(email: &str) -> ClientSpec {
        ClientSpec {
            proto: Proto::Trojan,
            id: String::new(),
            password: "s3cret".into(),
            email: email.into(),
        }
    }

    fn clients_in(path: &Path, tag: &str) -> Vec<Value> {
        let root: Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        root["inbounds"]
            .as_array()
            .unwrap()
            .iter()
            .find(|inbound| inbound["tag"] == tag)
            .unwrap()["settings"]["clients"]
            .as_array()
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn patch_writes_sorted_entries_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let config = seed_config(dir.path());
        let control = Arc::new(ScriptedControl::default());
        let applier = applier_at(&config, control.clone());

        let desired = vec![vless("b@x.io"), vless("a@x.io"), trojan("t@x.io")];
        let changed = applier
            .apply(&HashMap::new(), &desired, &HashMap::new(), &[])
            .await
            .unwrap();
        assert!(changed);

        let vless_clients = clients_in(&config, "vless-in");
        assert_eq!(vless_clients.len(), 2);
        assert_eq!(vless_clients[0]["email"], "a@x.io");
        assert_eq!(vless_clients[1]["email"], "b@x.io");

        let trojan_clients = clients_in(&config, "trojan-in");
        assert_eq!(trojan_clients[0]["password"], "s3cret");
        assert!(trojan_clients[0].get("id").is_none());
        assert!(clients_in(&config, "vmess-in").is_empty());

        assert_eq!(control.reloads.load(Ordering::SeqCst), 1);
        let validations = control.validations.lock().unwrap();
        assert_eq!(validations.len(), 1);
        assert_ne!(validations[0], config);
        assert_eq!(validations[0].parent(), config.parent());
    }

    #[tokio::test]
    async fn unchanged_desired_state_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let config = seed_config(dir.path());
        let control = Arc::new(ScriptedControl::default());
        let applier = applier_at(&config, control.clone());
        let desired = vec![vless("a@x.io")];

        let first = applier
            .apply(&HashMap::new(), &desired, &HashMap::new(), &[])
            .await
            .unwrap();
        let second = applier
            .apply(&HashMap::new(), &desired, &HashMap::new(), &[])
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(control.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(control.validations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn validation_failure_leaves_live_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let config = seed_config(dir.path());
        let original = std::fs::read(&config).unwrap();
        let control = Arc::new(ScriptedControl::default());
        control.reject_config.store(true, Ordering::SeqCst);
        let applier = applier_at(&config, control.clone());
        let desired = vec![vless("a@x.io")];

        let err = applier
            .apply(&HashMap::new(), &desired, &HashMap::new(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Validation(_)));
        assert_eq!(std::fs::read(&config).unwrap(), original);
        assert_eq!(control.reloads.load(Ordering::SeqCst), 0);

        // The rejected candidate is cleaned up.
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "left behind: {names:?}");

        // Once the config passes, the same desired state applies cleanly.
        control.reject_config.store(false, Ordering::SeqCst);
        let changed = applier
            .apply(&HashMap::new(), &desired, &HashMap::new(), &[])
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(clients_in(&config, "vless-in").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reload_failure_is_sticky_until_it_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let config = seed_config(dir.path());
        let control = Arc::new(ScriptedControl::default());
        control.reload_failures.store(4, Ordering::SeqCst);
        let applier = applier_at(&config, control.clone());
        let desired = vec![vless("a@x.io")];

        let err = applier
            .apply(&HashMap::new(), &desired, &HashMap::new(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Reload(_)));
        assert_eq!(control.reloads.load(Ordering::SeqCst), 4);
        // The swap itself landed.
        assert_eq!(clients_in(&config, "vless-in").len(), 1);

        // File already matches, but the pending reload is retried.
        let changed = applier
            .apply(&HashMap::new(), &desired, &HashMap::new(), &[])
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(control.reloads.load(Ordering::SeqCst), 5);

        // Flag cleared: further no-op cycles stop touching the service.
        applier
            .apply(&HashMap::new(), &desired, &HashMap::new(), &[])
            .await
            .unwrap();
        assert_eq!(control.reloads.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn missing_inbound_tag_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let doc = json!({
            "inbounds": [
                {"tag": "vless-in", "settings": {"clients": []}},
                {"tag": "vmess-in", "settings": {"clients": []}}
            ]
        });
        let config = dir.path().join("config.json");
        std::fs::write(&config, serde_json::to_vec(&doc).unwrap()).unwrap();
        let applier = applier_at(&config, Arc::new(ScriptedControl::default()));

        let err = applier
            .apply(&HashMap::new(), &[vless("a@x.io")], &HashMap::new(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::MissingInbound { tag } if tag == "trojan-in"));
    }

    #[tokio::test]
    async fn inbound_without_settings_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let doc = json!({
            "inbounds": [
                {"tag": "vless-in"},
                {"tag": "vmess-in", "settings": {"clients": []}},
                {"tag": "trojan-in", "settings": {"clients": []}}
            ]
        });
        let config = dir.path().join("config.json");
        std::fs::write(&config, serde_json::to_vec(&doc).unwrap()).unwrap();
        let applier = applier_at(&config, Arc::new(ScriptedControl::default()));

        let err = applier
            .apply(&HashMap::new(), &[], &HashMap::new(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::MalformedInbound { tag } if tag == "vless-in"));
    }

    #[tokio::test]
    async fn missing_config_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("missing.json");
        let applier = applier_at(&config, Arc::new(ScriptedControl::default()));

        let err = applier
            .apply(&HashMap::new(), &[], &HashMap::new(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Read { .. }));
    }

    #[tokio::test]
    async fn route_changes_are_skipped_in_file_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = seed_config(dir.path());
        let control = Arc::new(ScriptedControl::default());
        let applier = applier_at(&config, control.clone());

        let desired_routes = vec![RouteRule {
            tag: "cn-direct".into(),
            outbound_tag: "direct".into(),
            ..Default::default()
        }];
        let changed = applier
            .apply(&HashMap::new(), &[], &HashMap::new(), &desired_routes)
            .await
            .unwrap();

        assert!(!changed);
        assert_eq!(control.reloads.load(Ordering::SeqCst), 0);
        assert!(control.validations.lock().unwrap().is_empty());
    }
}
