//! `lock` and `unlock`.

use crate::core::context::Context;
use crate::core::error::RunnerError;
use crate::core::protocol::Response;
use crate::core::registry::{Command, CommandSpec, Invocation};
use crate::core::xml::element;

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "lock",
            params: &[],
            usage: "",
            summary: "Lock the service to the calling user.",
            details: "Only the lock holder may run mutating commands afterwards. \
                      The administrator can take the lock over; the previous holder \
                      gets it back when the administrator unlocks.",
            allowed_states: None,
            denied_action: "lock the service",
            acl: false,
            factory: |inv| Box::new(Lock(inv)),
        },
        CommandSpec {
            name: "unlock",
            params: &[],
            usage: "",
            summary: "Release the service lock.",
            details: "The holder may release its own lock. The administrator may \
                      release any lock. Unlocking an unlocked service succeeds.",
            allowed_states: None,
            denied_action: "unlock the service",
            acl: false,
            factory: |inv| Box::new(Unlock(inv)),
        },
    ]
}

struct Lock(Invocation);

impl Command for Lock {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let mut agent = ctx.agent.lock();
        agent.lock.acquire(self.0.user())?;
        response.ack(format!("{}\n", element("locked", agent.lock.display())));
        Ok(())
    }
}

struct Unlock(Invocation);

impl Command for Unlock {
    fn execute(&mut self, ctx: &Context, response: &mut Response) -> Result<(), RunnerError> {
        let mut agent = ctx.agent.lock();
        agent.lock.release(self.0.user())?;
        response.ack(format!("{}\n", element("locked", agent.lock.display())));
        Ok(())
    }
}
