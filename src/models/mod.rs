pub mod language;
pub mod report;
pub mod session;

pub use language::*;
pub use report::*;
pub use session::*;
