use inquire::{Confirm, InquireError};

/// Yes/no questions asked before irreversible steps.
pub trait Prompt {
    /// `true` only on an explicit yes.
    fn confirm(&self, message: &str) -> bool;
}

/// Asks on the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct InteractivePrompt;

impl Prompt for InteractivePrompt {
    fn confirm(&self, message: &str) -> bool {
        match Confirm::new(message).with_default(false).prompt() {
            Ok(answer) => answer,
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => false,
            Err(e) => {
                log::warn!("Cannot ask for confirmation: {}", e);
                false
            }
        }
    }
}
