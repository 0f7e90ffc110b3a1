// UI module - Connect/disconnect toggle and send controls
pub mod controls;

pub use controls::{ControlPanel, Controls, ToggleAction, ToggleResult};
