//! Bulk operations over the bench's apps: planning and running updates, and
//! switching branches.

mod executor;
mod plan;
mod prompt;
mod switch;

pub use executor::{UpdateError, UpdateOptions, Updater};
pub use prompt::InteractivePrompt;
#[cfg(test)]
pub(crate) use prompt::Prompt;
pub use switch::{BranchSwitcher, SwitchError, SwitchReport};
