//! Static command catalog.

use crate::core::args::{self, DecodedArgs, RawArgs};
use crate::core::context::Context;
use crate::core::error::RunnerError;
use crate::core::lock::ANONYMOUS_USER;
use crate::core::protocol::Response;
use crate::core::state::RunState;
use rustc_hash::FxHashMap;

/// Who asked, with what.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub user: Option<String>,
    pub args: DecodedArgs,
}

impl Invocation {
    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or(ANONYMOUS_USER)
    }
}

/// One request's worth of work.
///
/// `execute` fills in the response. `post_response` runs after the response
/// has been flushed and the connection closed; it is where anything that
/// could kill the connection (restart, quit, reboot) or outlive the request
/// (background tasks) belongs.
pub trait Command: Send {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError>;

    fn post_response(&mut self, _ctx: &Context) -> Result<(), RunnerError> {
        Ok(())
    }
}

pub type CommandFactory = fn(Invocation) -> Box<dyn Command>;

pub struct CommandSpec {
    pub name: &'static str,
    pub params: &'static [&'static str],
    /// Parameter synopsis for help, e.g. `<suite>`.
    pub usage: &'static str,
    pub summary: &'static str,
    pub details: &'static str,
    /// `None` means legal in every state.
    pub allowed_states: Option<&'static [RunState]>,
    /// Completes "Can NOT ... from state X".
    pub denied_action: &'static str,
    /// Mutating commands go through the lock check.
    pub acl: bool,
    pub factory: CommandFactory,
}

impl CommandSpec {
    pub fn allows(&self, state: RunState) -> bool {
        self.allowed_states.is_none_or(|s| s.contains(&state))
    }

    pub fn synopsis(&self) -> String {
        if self.usage.is_empty() {
            self.name.to_string()
        } else {
            format!("{} {}", self.name, self.usage)
        }
    }

    pub fn decode(&self, raw: &RawArgs) -> Result<DecodedArgs, RunnerError> {
        args::decode(self.name, raw, self.params)
    }

    pub fn instantiate(&self, user: Option<String>, args: DecodedArgs) -> Box<dyn Command> {
        (self.factory)(Invocation { user, args })
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("acl", &self.acl)
            .finish()
    }
}

#[derive(Debug)]
pub struct Registry {
    specs: Vec<CommandSpec>,
    index: FxHashMap<&'static str, usize>,
}

impl Registry {
    /// Builds the catalog; on duplicate names the first entry wins.
    pub fn new(mut specs: Vec<CommandSpec>) -> Self {
        specs.sort_by(|a, b| a.name.cmp(b.name));
        specs.dedup_by(|later, earlier| later.name == earlier.name);
        let index = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name, i))
            .collect();
        Self { specs, index }
    }

    /// Names are matched case-insensitively.
    pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        let key = name.to_ascii_lowercase();
        self.index.get(key.as_str()).map(|i| &self.specs[*i])
    }

    /// Sorted by name.
    pub fn list(&self) -> impl Iterator<Item = &CommandSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
