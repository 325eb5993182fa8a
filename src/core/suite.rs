//! Test suites and test cases.
//!
//! Suites live on disk as TOML manifests under `<testsuites>/<product>/<suite>.toml`.
//! A manifest lists its cases inline, or references shared case manifests kept
//! under `<testcases>/<folder>/<case>.toml`:
//!
//! ```toml
//! name = "smoke"
//! product_name = "Widget"
//!
//! [[case]]
//! name = "boot"
//! description = "device boots to the home screen"
//! command = "check_boot.sh"
//! timeout_secs = 120
//!
//! [[case]]
//! ref = "common/battery"
//! ```

use crate::core::error::RunnerError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static MODULE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-]+(?:[./][A-Za-z0-9_\-]+)*$").unwrap());

pub const DEFAULT_CASE_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaseResult {
    #[default]
    NotRun,
    Pass,
    Fail,
    Block,
    Crash,
    Error,
}

impl CaseResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseResult::NotRun => "NOTRUN",
            CaseResult::Pass => "PASS",
            CaseResult::Fail => "FAIL",
            CaseResult::Block => "BLOCK",
            CaseResult::Crash => "CRASH",
            CaseResult::Error => "ERROR",
        }
    }

    pub fn is_executed(&self) -> bool {
        *self != CaseResult::NotRun
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFile {
    pub path: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub description: String,
    pub documentation: String,
    pub command: Option<String>,
    pub timeout_secs: u64,
    pub enabled: bool,
    pub result: CaseResult,
    pub start_time: u64,
    pub finish_time: u64,
    pub log: Vec<String>,
    pub result_data: Vec<ResultFile>,
}

impl TestCase {
    pub fn reset(&mut self) {
        self.result = CaseResult::NotRun;
        self.start_time = 0;
        self.finish_time = 0;
        self.log.clear();
        self.result_data.clear();
    }

    pub fn result_file(&self, name: &str) -> Option<&ResultFile> {
        self.result_data.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suite {
    /// Module name the suite was loaded from, e.g. `widget/smoke`.
    pub module: String,
    pub name: String,
    pub product_name: String,
    pub product_codename: String,
    pub product_version: String,
    pub build: Option<String>,
    pub previous_build: Option<String>,
    pub compliance_module: Option<String>,
    pub result_data_enabled: bool,
    pub result_data_dir: Option<PathBuf>,
    pub cases: Vec<TestCase>,
}

impl Suite {
    pub fn case(&self, name: &str) -> Result<&TestCase, RunnerError> {
        self.cases
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| self.no_such_case(name))
    }

    pub fn case_mut(&mut self, name: &str) -> Result<&mut TestCase, RunnerError> {
        let err = self.no_such_case(name);
        self.cases.iter_mut().find(|c| c.name == name).ok_or(err)
    }

    fn no_such_case(&self, name: &str) -> RunnerError {
        RunnerError::client(format!("No testcase named '{name}' in suite '{}'", self.name))
    }

    pub fn enabled_cases(&self) -> impl Iterator<Item = &TestCase> {
        self.cases.iter().filter(|c| c.enabled)
    }

    pub fn enabled_count(&self) -> u32 {
        self.enabled_cases().count() as u32
    }

    pub fn reset_results(&mut self) {
        for case in &mut self.cases {
            case.reset();
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SuiteManifest {
    name: Option<String>,
    product_name: String,
    product_codename: String,
    product_version: String,
    result_data_enabled: Option<bool>,
    #[serde(rename = "case")]
    cases: Vec<CaseManifest>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CaseManifest {
    name: Option<String>,
    #[serde(rename = "ref")]
    reference: Option<String>,
    description: String,
    documentation: String,
    command: Option<String>,
    timeout_secs: Option<u64>,
    enabled: Option<bool>,
}

impl CaseManifest {
    fn into_case(self, fallback_name: &str, default_timeout: u64) -> TestCase {
        TestCase {
            name: self.name.unwrap_or_else(|| fallback_name.to_string()),
            description: self.description,
            documentation: self.documentation,
            command: self.command,
            timeout_secs: self.timeout_secs.unwrap_or(default_timeout),
            enabled: self.enabled.unwrap_or(true),
            result: CaseResult::NotRun,
            start_time: 0,
            finish_time: 0,
            log: Vec::new(),
            result_data: Vec::new(),
        }
    }
}

/// A product folder and the manifests found in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub name: String,
    pub entries: Vec<String>,
}

/// Locates and parses suite and case manifests.
#[derive(Debug, Clone)]
pub struct SuiteCatalog {
    suites_dir: PathBuf,
    cases_dir: PathBuf,
    default_timeout: u64,
}

impl SuiteCatalog {
    pub fn new(suites_dir: impl Into<PathBuf>, cases_dir: impl Into<PathBuf>) -> Self {
        Self {
            suites_dir: suites_dir.into(),
            cases_dir: cases_dir.into(),
            default_timeout: DEFAULT_CASE_TIMEOUT_SECS,
        }
    }

    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout = secs;
        self
    }

    fn validate(module: &str) -> Result<(), RunnerError> {
        if MODULE_NAME.is_match(module) {
            Ok(())
        } else {
            Err(RunnerError::client(format!("invalid module name '{module}'")))
        }
    }

    /// Manifest path for `product/suite`, `product.suite`, or a bare suite name
    /// searched across product folders in name order.
    pub fn resolve_suite(&self, module: &str) -> Result<PathBuf, RunnerError> {
        Self::validate(module)?;
        if let Some((folder, name)) = module.split_once(['/', '.']) {
            let path = self.suites_dir.join(folder).join(format!("{name}.toml"));
            return if path.is_file() {
                Ok(path)
            } else {
                Err(RunnerError::NotFound(format!("test suite '{module}'")))
            };
        }
        for folder in list_folders(&self.suites_dir)? {
            let path = self.suites_dir.join(&folder.name).join(format!("{module}.toml"));
            if path.is_file() {
                return Ok(path);
            }
        }
        Err(RunnerError::NotFound(format!("test suite '{module}'")))
    }

    pub fn load(&self, module: &str) -> Result<Suite, RunnerError> {
        let path = self.resolve_suite(module)?;
        let text = fs::read_to_string(&path)?;
        let manifest: SuiteManifest = toml::from_str(&text).map_err(|e| {
            RunnerError::server(format!("failed to parse {}: {e}", path.display()))
        })?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(module)
            .to_string();
        let mut cases = Vec::with_capacity(manifest.cases.len());
        for (i, entry) in manifest.cases.into_iter().enumerate() {
            let case = match entry.reference.clone() {
                Some(reference) => self.load_case(&reference, entry)?,
                None => entry.into_case(&format!("case{}", i + 1), self.default_timeout),
            };
            if cases.iter().any(|c: &TestCase| c.name == case.name) {
                return Err(RunnerError::server(format!(
                    "duplicate testcase '{}' in suite '{module}'",
                    case.name
                )));
            }
            cases.push(case);
        }

        Ok(Suite {
            module: module.to_string(),
            name: manifest.name.unwrap_or(stem),
            product_name: manifest.product_name,
            product_codename: manifest.product_codename,
            product_version: manifest.product_version,
            build: None,
            previous_build: None,
            compliance_module: None,
            result_data_enabled: manifest.result_data_enabled.unwrap_or(true),
            result_data_dir: None,
            cases,
        })
    }

    /// Loads a shared case manifest; fields set on the referencing entry win.
    fn load_case(&self, reference: &str, overrides: CaseManifest) -> Result<TestCase, RunnerError> {
        Self::validate(reference)?;
        let (folder, name) = reference
            .split_once(['/', '.'])
            .ok_or_else(|| RunnerError::client(format!("case reference '{reference}' needs a folder")))?;
        let path = self.cases_dir.join(folder).join(format!("{name}.toml"));
        if !path.is_file() {
            return Err(RunnerError::NotFound(format!("testcase '{reference}'")));
        }
        let text = fs::read_to_string(&path)?;
        let mut base: CaseManifest = toml::from_str(&text).map_err(|e| {
            RunnerError::server(format!("failed to parse {}: {e}", path.display()))
        })?;
        if overrides.name.is_some() {
            base.name = overrides.name;
        }
        if !overrides.description.is_empty() {
            base.description = overrides.description;
        }
        if overrides.command.is_some() {
            base.command = overrides.command;
        }
        if overrides.timeout_secs.is_some() {
            base.timeout_secs = overrides.timeout_secs;
        }
        if overrides.enabled.is_some() {
            base.enabled = overrides.enabled;
        }
        Ok(base.into_case(name, self.default_timeout))
    }

    pub fn list_suites(&self) -> Result<Vec<Folder>, RunnerError> {
        list_folders(&self.suites_dir)
    }

    pub fn list_cases(&self) -> Result<Vec<Folder>, RunnerError> {
        list_folders(&self.cases_dir)
    }
}

/// Non-hidden subdirectories of `root`, each with its `.toml` stems; both sorted.
fn list_folders(root: &Path) -> Result<Vec<Folder>, RunnerError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut folders = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        let mut entries = Vec::new();
        for item in fs::read_dir(entry.path())? {
            let path = item?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    entries.push(stem.to_string());
                }
            }
        }
        entries.sort();
        folders.push(Folder { name, entries });
    }
    folders.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(folders)
}
