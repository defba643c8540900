use crate::hex::HexCoord;

/// A command issued by a script. Pure data; the orchestrator applies it after
/// the issuing script has returned.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Move { target: HexCoord },
    /// Only costs energy until a resource system exists.
    Harvest { target: HexCoord },
    Consume { resource: String, amount: f64 },
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Move { .. } => "move",
            Action::Harvest { .. } => "harvest",
            Action::Consume { .. } => "consume",
        }
    }
}

/// FIFO buffer for the actions of one script execution. Reading does not
/// drain it; `clear` is a separate step.
#[derive(Debug, Default)]
pub struct ActionQueue {
    actions: Vec<Action>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }
}
