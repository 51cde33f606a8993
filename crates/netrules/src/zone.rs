//! Zone snapshot loading and the manager session built on top of it.
//!
//! A zone file is a `ZoneSnapshot` as YAML, or JSON when the file name
//! ends in `.json`. Each invocation loads it into a `MemoryStore`, runs
//! one manager operation and, with `--write`, saves the result back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use netrules_api::{RecordingTransport, RouterTransport};
use netrules_config::Config;
use netrules_core::model::Account;
use netrules_core::{Dependencies, MemoryStore, RulesManager, ZoneSnapshot};
use serde::Serialize;
use tabled::Tabled;
use tracing::{debug, info};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output::{self, Ui};

// ── Snapshot files ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneFormat {
    Yaml,
    Json,
}

impl ZoneFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

pub fn read_snapshot(path: &Path) -> Result<ZoneSnapshot, CliError> {
    let text = std::fs::read_to_string(path)?;
    let format_err = |reason: String| CliError::ZoneFormat {
        path: path.display().to_string(),
        reason,
    };
    match ZoneFormat::for_path(path) {
        ZoneFormat::Json => serde_json::from_str(&text).map_err(|e| format_err(e.to_string())),
        ZoneFormat::Yaml => serde_yaml::from_str(&text).map_err(|e| format_err(e.to_string())),
    }
}

pub fn write_snapshot(path: &Path, snapshot: &ZoneSnapshot) -> Result<(), CliError> {
    let text = match ZoneFormat::for_path(path) {
        ZoneFormat::Json => serde_json::to_string_pretty(snapshot)?,
        ZoneFormat::Yaml => {
            serde_yaml::to_string(snapshot).map_err(|e| CliError::Render(e.to_string()))?
        }
    };
    std::fs::write(path, text)?;
    Ok(())
}

/// Pick the calling account by name or UUID. A zone with a single
/// account needs no selection.
pub fn resolve_account(snapshot: &ZoneSnapshot, selector: Option<&str>) -> Result<Account, CliError> {
    let available = || {
        snapshot
            .accounts
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    match selector {
        Some(selector) => snapshot
            .accounts
            .iter()
            .find(|a| a.name == selector || a.uuid.to_string() == selector)
            .cloned()
            .ok_or_else(|| CliError::UnknownAccount {
                name: selector.into(),
                available: available(),
            }),
        None => match snapshot.accounts.as_slice() {
            [only] => Ok(only.clone()),
            [] => Err(CliError::UnknownAccount {
                name: "(none)".into(),
                available: "(none)".into(),
            }),
            _ => Err(CliError::AmbiguousAccount {
                available: available(),
            }),
        },
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// A loaded zone with a manager wired to it.
pub struct Session {
    pub manager: RulesManager,
    pub store: Arc<MemoryStore>,
    pub caller: Account,
    path: PathBuf,
    recorder: Option<Arc<RecordingTransport>>,
}

impl Session {
    pub fn open(global: &GlobalOpts, config: &Config) -> Result<Self, CliError> {
        let path = global.zone.clone().ok_or(CliError::NoZone)?;
        let snapshot = read_snapshot(&path)?;
        let caller = resolve_account(&snapshot, global.account.as_deref())?;
        let store = Arc::new(MemoryStore::from_snapshot(snapshot)?);

        let (transport, recorder): (Arc<dyn RouterTransport>, _) = if global.dry_run {
            let recorder = Arc::new(RecordingTransport::new());
            (recorder.clone(), Some(recorder))
        } else {
            let transport_config = netrules_config::transport_config(&config.transport);
            let http = netrules_api::HttpTransport::new(&transport_config)?;
            (Arc::new(http), None)
        };

        debug!(
            zone = %path.display(),
            account = %caller.name,
            dry_run = global.dry_run,
            "zone loaded"
        );

        let deps = Dependencies::in_memory(store.clone(), transport);
        let manager = RulesManager::new(deps, netrules_config::manager_config(config));
        Ok(Self {
            manager,
            store,
            caller,
            path,
            recorder,
        })
    }

    /// Report what the operation sent and persist the zone if asked to.
    pub fn finish(self, global: &GlobalOpts, ui: &Ui) -> Result<(), CliError> {
        if let Some(ref recorder) = self.recorder {
            let sent: Vec<DispatchedBatch> = recorder
                .take_sent()
                .into_iter()
                .map(|(router, batch)| DispatchedBatch {
                    router: router.name,
                    control_ip: router.control_ip.to_string(),
                    batch,
                })
                .collect();
            // Structured formats keep the batches intact.
            let out = match ui.format {
                OutputFormat::Table | OutputFormat::Plain => output::render_list(
                    ui.format,
                    &sent_rows(&sent),
                    DispatchRow::clone,
                    |r| format!("{} {}", r.router, r.command),
                )?,
                _ => output::render_single(ui.format, &sent, |_| String::new(), |_| String::new())?,
            };
            output::print_output(&out, ui.quiet);
        }

        if global.write {
            write_snapshot(&self.path, &self.store.to_snapshot())?;
            info!(zone = %self.path.display(), "zone written");
        }
        Ok(())
    }
}

// ── Dispatched commands ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct DispatchedBatch {
    router: String,
    control_ip: String,
    #[serde(flatten)]
    batch: netrules_api::CommandBatch,
}

#[derive(Debug, Clone, Serialize, Tabled)]
struct DispatchRow {
    #[tabled(rename = "Router")]
    router: String,
    #[tabled(rename = "Control IP")]
    control_ip: String,
    #[tabled(rename = "#")]
    position: usize,
    #[tabled(rename = "Command")]
    command: String,
}

fn sent_rows(sent: &[DispatchedBatch]) -> Vec<DispatchRow> {
    sent.iter()
        .flat_map(|b| {
            b.batch
                .commands
                .iter()
                .enumerate()
                .map(|(i, command)| DispatchRow {
                    router: b.router.clone(),
                    control_ip: b.control_ip.clone(),
                    position: i + 1,
                    command: command.kind().to_owned(),
                })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use netrules_core::model::{AccountId, AccountRole, DomainId};
    use uuid::Uuid;

    use super::*;

    fn account(id: u64, name: &str) -> Account {
        Account {
            id: AccountId(id),
            uuid: Uuid::new_v4(),
            name: name.into(),
            domain_id: DomainId(1),
            role: AccountRole::User,
        }
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ZoneFormat::for_path(Path::new("zone.json")), ZoneFormat::Json);
        assert_eq!(ZoneFormat::for_path(Path::new("zone.JSON")), ZoneFormat::Json);
        assert_eq!(ZoneFormat::for_path(Path::new("zone.yaml")), ZoneFormat::Yaml);
        assert_eq!(ZoneFormat::for_path(Path::new("zone")), ZoneFormat::Yaml);
    }

    #[test]
    fn single_account_is_implied() {
        let snapshot = ZoneSnapshot {
            accounts: vec![account(1, "alice")],
            ..ZoneSnapshot::default()
        };
        assert_eq!(resolve_account(&snapshot, None).unwrap().name, "alice");
    }

    #[test]
    fn several_accounts_need_a_selector() {
        let bob = account(2, "bob");
        let snapshot = ZoneSnapshot {
            accounts: vec![account(1, "alice"), bob.clone()],
            ..ZoneSnapshot::default()
        };
        assert!(matches!(
            resolve_account(&snapshot, None),
            Err(CliError::AmbiguousAccount { .. })
        ));
        assert_eq!(resolve_account(&snapshot, Some("bob")).unwrap().id, bob.id);
        let by_uuid = bob.uuid.to_string();
        assert_eq!(resolve_account(&snapshot, Some(&by_uuid)).unwrap().id, bob.id);
        assert!(matches!(
            resolve_account(&snapshot, Some("carol")),
            Err(CliError::UnknownAccount { .. })
        ));
    }

    #[test]
    fn snapshots_round_trip_through_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = ZoneSnapshot {
            accounts: vec![account(1, "alice")],
            ..ZoneSnapshot::default()
        };
        for name in ["zone.yaml", "zone.json"] {
            let path = dir.path().join(name);
            write_snapshot(&path, &snapshot).unwrap();
            assert_eq!(read_snapshot(&path).unwrap(), snapshot);
        }
    }
}
