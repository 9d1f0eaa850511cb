pub mod billing;
pub mod budget;
pub mod campaign;
pub mod click;
pub mod dashboard;
pub mod errors;
pub mod notification;

pub use billing::*;
pub use budget::*;
pub use campaign::*;
pub use click::*;
pub use dashboard::*;
pub use errors::*;
pub use notification::*;
