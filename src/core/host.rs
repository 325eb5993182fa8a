//! Host platform details reported by `hostinfo`.

use crate::core::xml::element;
use std::fs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub system: String,
    pub arch: String,
    pub patch: String,
    pub version: String,
    pub hardware: String,
    pub uid: Option<String>,
}

impl PlatformInfo {
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<hostinfo>\n");
        for (tag, value) in [
            ("system", &self.system),
            ("arch", &self.arch),
            ("patch", &self.patch),
            ("version", &self.version),
            ("hardware", &self.hardware),
        ] {
            out.push_str(&format!("  {}\n", element(tag, value)));
        }
        if let Some(uid) = &self.uid {
            out.push_str(&format!("  {}\n", element("uid", uid)));
        }
        out.push_str("</hostinfo>\n");
        out
    }
}

pub trait HostInfo: Send + Sync {
    fn platform(&self) -> PlatformInfo;
}

/// Reads what the running process can see about its own host.
#[derive(Debug, Clone, Default)]
pub struct LocalHost;

fn read_trimmed(path: &str) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl HostInfo for LocalHost {
    fn platform(&self) -> PlatformInfo {
        let arch = if cfg!(target_pointer_width = "64") {
            "64bit"
        } else {
            "32bit"
        };
        PlatformInfo {
            system: std::env::consts::OS.to_string(),
            arch: arch.to_string(),
            patch: read_trimmed("/proc/sys/kernel/version").unwrap_or_else(|| "None".into()),
            version: read_trimmed("/proc/sys/kernel/osrelease")
                .unwrap_or_else(|| "Unknown".into()),
            hardware: std::env::consts::ARCH.to_string(),
            uid: read_trimmed("/etc/machine-id"),
        }
    }
}
