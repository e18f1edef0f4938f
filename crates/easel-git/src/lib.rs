pub mod command;
pub mod error;
pub mod ops;

pub use command::{GitCli, GitOutput};
pub use error::GitError;
pub use ops::*;
