//! Everything a command can reach, passed explicitly.

use crate::commands;
use crate::core::config::Config;
use crate::core::device::{Device, ShellDevice};
use crate::core::history::History;
use crate::core::host::{HostInfo, LocalHost};
use crate::core::maintenance::{OsUpdater, ScriptedOsUpdater};
use crate::core::process::{ProcessControl, SystemProcess};
use crate::core::registry::Registry;
use crate::core::runner::{CaseExecutor, DeviceCaseExecutor, TestRunner};
use crate::core::snapshot::{ScriptedSnapshots, SnapshotManager};
use crate::core::state::SharedAgent;
use crate::core::store::SaveStore;
use crate::core::suite::SuiteCatalog;
use crate::core::tasks::TaskSet;
use crate::core::upload::{DirectoryUploader, ResultsUploader};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// External collaborators, each behind a narrow trait.
#[derive(Clone)]
pub struct Services {
    pub device: Arc<dyn Device>,
    pub host: Arc<dyn HostInfo>,
    pub uploader: Arc<dyn ResultsUploader>,
    pub snapshots: Arc<dyn SnapshotManager>,
    pub updater: Arc<dyn OsUpdater>,
    pub process: Arc<dyn ProcessControl>,
    pub cases: Arc<dyn CaseExecutor>,
}

impl Services {
    pub fn from_config(config: &Config) -> Self {
        let timeout = config.timeouts.device_command();
        let device: Arc<dyn Device> =
            Arc::new(ShellDevice::new(config.device.clone(), timeout));
        Self {
            host: Arc::new(LocalHost),
            uploader: Arc::new(DirectoryUploader::new(config.paths.uploads_dir())),
            snapshots: Arc::new(ScriptedSnapshots::new(
                device.clone(),
                config.snapshots.take_command.clone(),
                config.snapshots.revert_command.clone(),
                timeout,
            )),
            updater: Arc::new(ScriptedOsUpdater::new(
                device.clone(),
                config.maintenance.search_command.clone(),
                config.maintenance.download_command.clone(),
                config.maintenance.install_command.clone(),
                timeout,
            )),
            process: Arc::new(SystemProcess::new(
                config.maintenance.reboot_command.clone(),
            )),
            cases: Arc::new(DeviceCaseExecutor::new(device.clone())),
            device,
        }
    }
}

#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub agent: SharedAgent,
    pub history: Arc<Mutex<History>>,
    pub registry: Arc<Registry>,
    pub tasks: Arc<TaskSet>,
    pub runner: Arc<TestRunner>,
    pub catalog: SuiteCatalog,
    pub saves: SaveStore,
    pub services: Services,
}

impl Context {
    pub fn new(config: Config, services: Services) -> Self {
        let catalog = SuiteCatalog::new(
            config.paths.testsuites_dir(),
            config.paths.testcases_dir(),
        )
        .with_default_timeout(config.timeouts.case_default_secs);
        let saves = SaveStore::new(config.paths.results_dir());
        Self {
            config: Arc::new(config),
            agent: SharedAgent::new(),
            history: Arc::new(Mutex::new(History::new())),
            registry: Arc::new(Registry::new(commands::catalog())),
            tasks: Arc::new(TaskSet::new()),
            runner: Arc::new(TestRunner::new()),
            catalog,
            saves,
            services,
        }
    }

    pub fn from_config(config: Config) -> Self {
        let services = Services::from_config(&config);
        Self::new(config, services)
    }

    pub fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
