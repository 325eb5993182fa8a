//! Bounded ledger of recently executed commands.

use crate::core::args::DecodedArgs;
use crate::core::xml;
use std::collections::VecDeque;

pub const HISTORY_LEN: usize = 20;

/// Polling commands that would otherwise flood the ledger.
pub const HISTORY_DENYLIST: &[&str] = &["status", "getcases", "hostinfo"];

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub user: String,
    pub command: String,
    pub args: DecodedArgs,
}

#[derive(Debug, Clone, Default)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends unless the command is denylisted; evicts the oldest past the bound.
    pub fn record(&mut self, user: &str, command: &str, args: &DecodedArgs) -> bool {
        if HISTORY_DENYLIST.contains(&command) {
            return false;
        }
        if self.entries.len() == HISTORY_LEN {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            user: user.to_string(),
            command: command.to_string(),
            args: args.clone(),
        });
        true
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn render(&self) -> String {
        let mut out = String::from("<history>\n");
        for e in &self.entries {
            let line = format!("{} {} {}", e.user, e.command, e.args);
            out.push_str(&format!("  {}\n", xml::element("command", &line)));
        }
        out.push_str("</history>\n");
        out
    }
}
