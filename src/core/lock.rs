//! Service lock with administrator preemption.
//!
//! At most one user holds the lock. The administrator may take it over from
//! anyone; the displaced holder is remembered and handed the lock back when
//! the administrator releases it.

use crate::core::error::RunnerError;
use serde::{Deserialize, Serialize};

/// User name with preemption rights.
pub const ADMIN_USER: &str = "admin";
/// Identity used for requests that carry no user.
pub const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    holder: Option<String>,
    pre_admin_holder: Option<String>,
}

impl LockState {
    pub fn holder(&self) -> Option<&str> {
        self.holder.as_deref()
    }

    pub fn pre_admin_holder(&self) -> Option<&str> {
        self.pre_admin_holder.as_deref()
    }

    pub fn is_locked(&self) -> bool {
        self.holder.is_some()
    }

    /// `<locked>` text: the holder, or `False` when unlocked.
    pub fn display(&self) -> &str {
        self.holder.as_deref().unwrap_or("False")
    }

    fn preempt(&mut self) {
        if self.holder.as_deref() != Some(ADMIN_USER) {
            self.pre_admin_holder = self.holder.take();
        }
        self.holder = Some(ADMIN_USER.to_string());
    }

    /// Gate for mutating commands. The administrator takes the lock over
    /// rather than being refused.
    pub fn check(&mut self, user: &str) -> Result<(), RunnerError> {
        match self.holder.as_deref() {
            None => Ok(()),
            Some(h) if h == user => Ok(()),
            Some(_) if user == ADMIN_USER => {
                self.preempt();
                Ok(())
            }
            Some(h) => Err(RunnerError::client(format!(
                "Permission denied! The service is locked by '{h}'"
            ))),
        }
    }

    /// Takes the lock for `user`; re-locking by the holder is a no-op.
    pub fn acquire(&mut self, user: &str) -> Result<(), RunnerError> {
        match self.holder.as_deref() {
            Some(h) if h == user => Ok(()),
            Some(_) if user == ADMIN_USER => {
                self.preempt();
                Ok(())
            }
            Some(h) => Err(RunnerError::client(format!(
                "The service is already locked by '{h}'"
            ))),
            None => {
                self.holder = Some(user.to_string());
                Ok(())
            }
        }
    }

    /// Releases the lock on behalf of `user`.
    pub fn release(&mut self, user: &str) -> Result<(), RunnerError> {
        match self.holder.as_deref() {
            None => Ok(()),
            Some(ADMIN_USER) if user == ADMIN_USER => {
                self.holder = self.pre_admin_holder.take();
                Ok(())
            }
            Some(_) if user == ADMIN_USER => {
                self.holder = None;
                self.pre_admin_holder = None;
                Ok(())
            }
            Some(h) if h == user => {
                self.holder = None;
                Ok(())
            }
            Some(h) => Err(RunnerError::client(format!(
                "Permission denied! The service is locked by '{h}'"
            ))),
        }
    }
}
