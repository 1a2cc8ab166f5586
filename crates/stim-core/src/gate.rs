use stim_model::{ControlSignal, ResourceName};
use tracing::{debug, warn};

use crate::resources::{Readiness, ResourceRegistry};
use crate::scheduler::Step;

/// Step that holds the flow until the named resources finished downloading.
///
/// Returns `Continue` while any of them is pending and `Next` once all of them are either
/// downloaded or failed. Failures are reported but never block the flow; consumers must
/// cope with the missing payload. An empty `names` list waits for every registered resource.
pub fn wait_for_resources(registry: ResourceRegistry, names: Vec<ResourceName>) -> Step {
    let label = if names.is_empty() {
        "wait_for_resources[*]".to_string()
    } else {
        format!("wait_for_resources[{}]", names.join(","))
    };

    let mut polls: u64 = 0;
    Step::new(label, move || {
        polls += 1;
        match registry.poll(&names) {
            Readiness::Pending { .. } => Ok(ControlSignal::Continue),
            Readiness::Ready { failed, missing } => {
                if !failed.is_empty() {
                    warn!(?failed, "resources failed to download, continuing without them");
                }
                if !missing.is_empty() {
                    warn!(?missing, "resources were never declared, continuing without them");
                }
                debug!(polls, "resources ready");
                Ok(ControlSignal::Next)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scheduler;
    use stim_model::{ResourceSpec, ResourceStatus};

    fn declare(registry: &ResourceRegistry, name: &str) {
        registry.register(&ResourceSpec::new(name, name));
        registry.update_status(name, ResourceStatus::Downloading, None);
    }

    #[test]
    fn next_only_when_both_resources_settle() {
        let registry = ResourceRegistry::new();
        declare(&registry, "A");
        declare(&registry, "B");
        let mut gate = wait_for_resources(registry.clone(), vec!["A".into(), "B".into()]);

        assert_eq!(gate.invoke().unwrap(), ControlSignal::Continue);
        registry.complete("A", vec![0]);
        assert_eq!(gate.invoke().unwrap(), ControlSignal::Continue);
        registry.fail("B", "timeout");
        assert_eq!(gate.invoke().unwrap(), ControlSignal::Next);
    }

    #[test]
    fn empty_registry_passes_immediately() {
        let mut flow = Scheduler::new("main");
        flow.add(wait_for_resources(ResourceRegistry::new(), vec![]));
        flow.start();
        assert_eq!(flow.tick(), ControlSignal::Next);
    }

    #[test]
    fn gate_blocks_following_steps() {
        let registry = ResourceRegistry::new();
        declare(&registry, "movie.mp4");

        let mut flow = Scheduler::new("main");
        flow.add(wait_for_resources(registry.clone(), vec![]));
        flow.add_step("trial", || Ok(ControlSignal::Stop));
        flow.start();

        assert_eq!(flow.tick(), ControlSignal::Continue);
        assert_eq!(flow.tick(), ControlSignal::Continue);
        registry.complete("movie.mp4", vec![]);
        assert_eq!(flow.tick(), ControlSignal::Next);
        assert_eq!(flow.tick(), ControlSignal::Stop);
    }
}
