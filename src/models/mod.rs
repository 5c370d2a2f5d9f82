mod billing;
mod events;
mod organization;
mod pending;
mod rollup;
mod top_up;
mod usage;

pub use billing::*;
pub use events::*;
pub use organization::*;
pub use pending::*;
pub use rollup::*;
pub use top_up::*;
pub use usage::*;
