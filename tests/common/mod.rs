#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use svcrunner::core::args::RawArgs;
use svcrunner::core::config::Config;
use svcrunner::core::context::{Context, Services};
use svcrunner::core::device::{CommandOutput, Device, DeviceError, ServiceAction};
use svcrunner::core::error::RunnerError;
use svcrunner::core::executor::Executor;
use svcrunner::core::host::{HostInfo, PlatformInfo};
use svcrunner::core::maintenance::{InstallReport, OsUpdater};
use svcrunner::core::process::ProcessControl;
use svcrunner::core::protocol::{self, Request, WireResponse};
use svcrunner::core::runner::{CaseExecutor, CaseReport, CaseRun};
use svcrunner::core::snapshot::SnapshotManager;
use svcrunner::core::state::RunState;
use svcrunner::core::suite::{CaseResult, ResultFile};
use svcrunner::core::upload::{ResultsUploader, UploadReceipt, UploadRequest};
use tempfile::TempDir;

pub const SMOKE_SUITE: &str = r#"
name = "smoke"
product_name = "Widget"
product_codename = "wdg"
product_version = "2.1"

[[case]]
name = "caseA"
description = "first"
command = "true"

[[case]]
name = "caseB"
description = "second"
command = "true"

[[case]]
name = "caseC"
description = "third"
command = "true"
"#;

/// Case executor with scripted results. While held, cases block until
/// released so a run can be observed mid-flight.
#[derive(Default)]
pub struct ScriptedCases {
    outcomes: Mutex<HashMap<String, CaseResult>>,
    executed: Mutex<Vec<String>>,
    held: Mutex<bool>,
    gate: Condvar,
}

impl ScriptedCases {
    pub fn set(&self, case: &str, result: CaseResult) {
        self.outcomes
            .lock()
            .expect("outcomes")
            .insert(case.to_string(), result);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().expect("executed").clone()
    }

    pub fn hold(&self) {
        *self.held.lock().expect("held") = true;
    }

    pub fn release(&self) {
        *self.held.lock().expect("held") = false;
        self.gate.notify_all();
    }
}

impl CaseExecutor for ScriptedCases {
    fn run_case(&self, run: &CaseRun) -> Result<CaseReport, RunnerError> {
        self.executed
            .lock()
            .expect("executed")
            .push(run.case.name.clone());
        {
            let held = self.held.lock().expect("held");
            let (_held, timeout) = self
                .gate
                .wait_timeout_while(held, Duration::from_secs(10), |h| *h)
                .expect("gate");
            assert!(!timeout.timed_out(), "case gate never released");
        }
        let result = self
            .outcomes
            .lock()
            .expect("outcomes")
            .get(&run.case.name)
            .copied()
            .unwrap_or(CaseResult::Pass);
        let mut report = CaseReport::new(result);
        report.log.push(format!("scripted {}", result.as_str()));
        if let Some(dir) = &run.result_dir {
            let case_dir = dir.join(&run.case.name);
            fs::create_dir_all(&case_dir)?;
            let path = case_dir.join("output.log");
            fs::write(&path, format!("output of {}", run.case.name))?;
            report.files.push(ResultFile {
                path,
                name: "output.log".to_string(),
            });
        }
        Ok(report)
    }
}

#[derive(Default)]
pub struct MockProcess {
    quit: AtomicBool,
    pub restarts: AtomicUsize,
    pub reboots: AtomicUsize,
}

impl ProcessControl for MockProcess {
    fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    fn restart(&self) -> Result<(), RunnerError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reboot(&self) -> Result<(), RunnerError> {
        self.reboots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDevice {
    pub commands: Mutex<Vec<String>>,
}

impl Device for MockDevice {
    fn run_shell_command(
        &self,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, DeviceError> {
        self.commands
            .lock()
            .expect("commands")
            .push(command.to_string());
        Ok(CommandOutput {
            exit_code: Some(0),
            ..CommandOutput::default()
        })
    }

    fn push_file(&self, _local: &Path, _remote: &Path) -> Result<(), DeviceError> {
        Ok(())
    }

    fn pull_file(&self, _remote: &Path, _local: &Path) -> Result<(), DeviceError> {
        Ok(())
    }

    fn read_properties(&self) -> Result<BTreeMap<String, String>, DeviceError> {
        Ok(BTreeMap::new())
    }

    fn control_service(&self, _name: &str, _action: ServiceAction) -> Result<(), DeviceError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MockUploader {
    pub requests: Mutex<Vec<UploadRequest>>,
    pub fail: AtomicBool,
}

impl ResultsUploader for MockUploader {
    fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, RunnerError> {
        self.requests
            .lock()
            .expect("requests")
            .push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(RunnerError::server("results server unreachable"));
        }
        Ok(UploadReceipt {
            destination: request.source.clone(),
            files: 1,
            bytes: 1,
        })
    }
}

#[derive(Default)]
pub struct MockSnapshots {
    pub taken: Mutex<Vec<String>>,
    pub reverted: Mutex<Vec<String>>,
}

impl SnapshotManager for MockSnapshots {
    fn take_snapshot(&self, name: &str) -> Result<(), RunnerError> {
        self.taken.lock().expect("taken").push(name.to_string());
        Ok(())
    }

    fn revert_to_latest(&self, name: &str) -> Result<(), RunnerError> {
        self.reverted.lock().expect("reverted").push(name.to_string());
        Ok(())
    }
}

pub struct MockUpdater {
    pub supported: bool,
    pub available: u32,
    pub reboot: bool,
}

impl OsUpdater for MockUpdater {
    fn supported(&self) -> bool {
        self.supported
    }

    fn search(&self) -> Result<u32, RunnerError> {
        if !self.supported {
            return Err(RunnerError::server("no update service on this host"));
        }
        Ok(self.available)
    }

    fn download(&self) -> Result<u32, RunnerError> {
        Ok(self.available)
    }

    fn install(&self) -> Result<InstallReport, RunnerError> {
        Ok(InstallReport {
            installed: self.available,
            failed: 0,
            reboot_required: self.reboot,
        })
    }
}

pub struct FixedHost;

impl HostInfo for FixedHost {
    fn platform(&self) -> PlatformInfo {
        PlatformInfo {
            system: "Linux".into(),
            arch: "64bit".into(),
            patch: "6.1.0".into(),
            version: "#1 SMP".into(),
            hardware: "x86_64".into(),
            uid: Some("host-1".into()),
        }
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub executor: Executor,
    pub cases: Arc<ScriptedCases>,
    pub process: Arc<MockProcess>,
    pub device: Arc<MockDevice>,
    pub uploader: Arc<MockUploader>,
    pub snapshots: Arc<MockSnapshots>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_updater(MockUpdater {
            supported: false,
            available: 0,
            reboot: false,
        })
    }

    pub fn with_updater(updater: MockUpdater) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let suite = tmp.path().join("testsuites/widget/smoke.toml");
        fs::create_dir_all(suite.parent().expect("parent")).expect("mkdir");
        fs::write(&suite, SMOKE_SUITE).expect("write suite");

        let mut config = Config::default();
        config.paths.base_dir = tmp.path().to_path_buf();
        config.timeouts.snapshot_delay_ms = 0;
        config.kickstart.install_command = Some("install {url}".into());
        config.kickstart.uninstall_command = Some("uninstall {product}".into());

        let cases = Arc::new(ScriptedCases::default());
        let process = Arc::new(MockProcess::default());
        let device = Arc::new(MockDevice::default());
        let uploader = Arc::new(MockUploader::default());
        let snapshots = Arc::new(MockSnapshots::default());
        let services = Services {
            device: device.clone(),
            host: Arc::new(FixedHost),
            uploader: uploader.clone(),
            snapshots: snapshots.clone(),
            updater: Arc::new(updater),
            process: process.clone(),
            cases: cases.clone(),
        };
        let executor = Executor::new(Context::new(config, services));
        Self {
            tmp,
            executor,
            cases,
            process,
            device,
            uploader,
            snapshots,
        }
    }

    pub fn ctx(&self) -> &Context {
        self.executor.context()
    }

    pub fn request(&self, request: &Request) -> WireResponse {
        let mut out: Vec<u8> = Vec::new();
        self.executor.handle(request, &mut out);
        protocol::read_response(&mut out.as_slice()).expect("response frame")
    }

    pub fn send(&self, user: Option<&str>, command: &str, args: RawArgs) -> WireResponse {
        self.request(&Request::new(user, command, args))
    }

    /// Sends `command` with space-separated positional arguments.
    pub fn cmd(&self, user: &str, command: &str, args: &str) -> WireResponse {
        let raw = if args.is_empty() {
            RawArgs::Absent
        } else {
            RawArgs::Legacy(args.to_string())
        };
        self.send(Some(user), command, raw)
    }

    pub fn state(&self) -> RunState {
        self.ctx().agent.state()
    }

    pub fn wait_for_state(&self, want: RunState) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.state() != want {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {want}, state is {}",
                self.state()
            );
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Waits until `count` cases have entered the case executor.
    pub fn wait_for_cases(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.cases.executed().len() < count {
            assert!(Instant::now() < deadline, "timed out waiting for {count} cases");
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Waits for every background task. Cases must not be held.
    pub fn settle(&self) {
        self.ctx().tasks.join_all();
    }
}
