pub mod runs;
pub mod serve;

pub use runs::RunsCommand;
pub use serve::ServeCommand;
