//! Attach lifecycle state machine
//!
//! Tracks how far an add operation got so failures can be reported with the
//! phase they interrupted. Uses dynamic dispatch mode so the phase can be read
//! back as a string.

use state_machines::state_machine;

state_machine! {
    name: AttachMachine,
    dynamic: true,
    initial: Pending,
    states: [Pending, Placed, Configured, Active, Registered, RolledBack, Failed],
    events {
        place {
            transition: { from: Pending, to: Placed }
        }
        configure {
            transition: { from: Placed, to: Configured }
        }
        activate {
            transition: { from: Configured, to: Active }
        }
        register {
            transition: { from: Active, to: Registered }
        }
        rollback {
            transition: { from: Placed, to: RolledBack }
        }
        fail {
            transition: { from: [Pending, Placed, Configured, Active], to: Failed }
        }
    }
}

/// Phase of one device attachment
pub struct Attachment {
    machine: DynamicAttachMachine<()>,
    interface: String,
}

impl Attachment {
    pub fn new(interface: &str) -> Self {
        Self {
            machine: AttachMachine::new(()).into_dynamic(),
            interface: interface.to_string(),
        }
    }

    /// Current phase name
    pub fn phase(&self) -> &str {
        self.machine.current_state()
    }

    fn advance(&mut self, event: AttachMachineEvent) {
        let from = self.phase().to_string();
        if let Err(e) = self.machine.handle(event) {
            tracing::warn!(
                interface = %self.interface,
                phase = %from,
                "invalid attach transition: {:?}",
                e
            );
            return;
        }
        tracing::trace!(
            interface = %self.interface,
            from = %from,
            to = %self.phase(),
            "attach phase"
        );
    }

    pub fn placed(&mut self) {
        self.advance(AttachMachineEvent::Place);
    }

    pub fn configured(&mut self) {
        self.advance(AttachMachineEvent::Configure);
    }

    pub fn activated(&mut self) {
        self.advance(AttachMachineEvent::Activate);
    }

    pub fn registered(&mut self) {
        self.advance(AttachMachineEvent::Register);
    }

    pub fn rolled_back(&mut self) {
        self.advance(AttachMachineEvent::Rollback);
    }

    pub fn failed(&mut self) {
        self.advance(AttachMachineEvent::Fail);
    }
}
